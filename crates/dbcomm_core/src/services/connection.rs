//! Connection establishment.
//!
//! Decides how to reach the store for a `ConnectionSpec` and returns a
//! `ClientHandle`. The decision is made once, in priority order:
//!
//! 1. a complete `mongodb://` URI is used verbatim
//! 2. an SSH tunnel when one is configured
//! 3. LDAP authentication, prompting for the password with bounded retries
//! 4. a plain unauthenticated connection
//!
//! Every connect proves itself by listing databases within `timeout_ms`.

use crate::error::{DbCommError, DbCommResult};
use crate::models::{AuthMode, ConnectionSpec, SecretString, SshAuth};
use crate::services::credentials::{
    CredentialProvider, InteractiveCredentialProvider, SecretRequest,
};
use crate::services::mongo::MongoConnector;
use crate::services::ssh_tunnel::{
    SshTunnelHandle, SshTunnelService, TunnelAuth, TunnelProvider, TunnelRequest,
};
use crate::services::store::{Connector, DocumentStore};
use crate::services::uri::{self, ConnectionUri};

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// How a spec will be connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPlan {
    /// Use the host string as a complete URI.
    DirectUri(String),
    /// Forward a local port over SSH.
    SshTunnel,
    /// LDAP bind with a prompted password.
    Ldap,
    /// Unauthenticated host list.
    Plain,
}

impl ConnectionPlan {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectUri(_) => "direct_uri",
            Self::SshTunnel => "ssh_tunnel",
            Self::Ldap => "ldap",
            Self::Plain => "plain",
        }
    }
}

/// Classify a spec. The first matching rule wins.
pub fn plan(spec: &ConnectionSpec) -> ConnectionPlan {
    if let Some(uri) = spec.host.as_uri() {
        ConnectionPlan::DirectUri(uri.to_string())
    } else if spec.uses_ssh() {
        ConnectionPlan::SshTunnel
    } else if spec.authentication == AuthMode::Ldap {
        ConnectionPlan::Ldap
    } else {
        ConnectionPlan::Plain
    }
}

fn build_runtime() -> DbCommResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("dbcomm-rt")
        .enable_all()
        .build()
        .map_err(|e| DbCommError::internal(format!("Failed to create tokio runtime: {e}")))
}

/// A live connection to a document store.
///
/// Owns the runtime that drives the store and, when tunneled, the SSH tunnel.
/// Release it with [`ClientHandle::close`].
pub struct ClientHandle {
    id: Uuid,
    store: Arc<dyn DocumentStore>,
    username: String,
    target: String,
    tunnel: Option<SshTunnelHandle>,
    fell_back_to_localhost: bool,
    connected_at: DateTime<Utc>,
    runtime: Runtime,
}

impl ClientHandle {
    /// Wrap an already connected store, e.g. an `InMemoryStore`.
    pub fn from_store(
        store: Arc<dyn DocumentStore>,
        username: impl Into<String>,
    ) -> DbCommResult<Self> {
        let target = store.name().to_string();
        Ok(Self::assemble(build_runtime()?, Uuid::new_v4(), username.into(), Connected::new(store, target)))
    }

    fn assemble(runtime: Runtime, id: Uuid, username: String, connected: Connected) -> Self {
        Self {
            id,
            store: connected.store,
            username,
            target: connected.target,
            tunnel: connected.tunnel,
            fell_back_to_localhost: connected.fell_back_to_localhost,
            connected_at: Utc::now(),
            runtime,
        }
    }

    /// Connection id used in log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acting username, stamped on inserted records.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Where the handle is connected, without credentials.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The SSH tunnel, when tunneled.
    pub fn tunnel(&self) -> Option<&SshTunnelHandle> {
        self.tunnel.as_ref()
    }

    /// Whether the remote store was unreachable and localhost was used instead.
    pub fn fell_back_to_localhost(&self) -> bool {
        self.fell_back_to_localhost
    }

    /// When the connection was established.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run a store future to completion on the handle's runtime.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Names of every database on the server.
    pub fn list_database_names(&self) -> DbCommResult<Vec<String>> {
        self.block_on(self.store.list_database_names())
    }

    /// Stop the tunnel and release driver resources.
    pub fn close(self) {
        if let Some(ref tunnel) = self.tunnel {
            tunnel.stop();
        }
        self.runtime.block_on(self.store.shutdown());
        tracing::info!(connection_id = %self.id, target = %self.target, "Connection closed");
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("store", &self.store.name())
            .field("username", &self.username)
            .field("target", &self.target)
            .field("tunnel", &self.tunnel)
            .field("fell_back_to_localhost", &self.fell_back_to_localhost)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Result of a successful connect, before it becomes a handle.
struct Connected {
    store: Arc<dyn DocumentStore>,
    target: String,
    tunnel: Option<SshTunnelHandle>,
    fell_back_to_localhost: bool,
}

impl Connected {
    fn new(store: Arc<dyn DocumentStore>, target: String) -> Self {
        Self { store, target, tunnel: None, fell_back_to_localhost: false }
    }
}

/// Turns a `ConnectionSpec` into a `ClientHandle`.
///
/// Collaborators are injectable: the connector opens stores, the credential
/// provider supplies missing passwords, the tunnel provider opens SSH tunnels.
pub struct ConnectionEstablisher {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    tunnels: Arc<dyn TunnelProvider>,
}

impl ConnectionEstablisher {
    /// Real driver, interactive prompts, `russh` tunnels.
    pub fn new() -> Self {
        Self {
            connector: Arc::new(MongoConnector::new()),
            credentials: Arc::new(InteractiveCredentialProvider::new()),
            tunnels: Arc::new(SshTunnelService::new()),
        }
    }

    /// Replace the store connector.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the credential provider.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the tunnel provider.
    pub fn with_tunnels(mut self, tunnels: Arc<dyn TunnelProvider>) -> Self {
        self.tunnels = tunnels;
        self
    }

    /// Connect according to `spec`.
    pub fn establish(&self, spec: &ConnectionSpec) -> DbCommResult<ClientHandle> {
        spec.validate()?;

        let runtime = build_runtime()?;
        let id = Uuid::new_v4();
        let username = spec.effective_username();
        let plan = plan(spec);

        tracing::info!(
            connection_id = %id,
            plan = plan.name(),
            target = %spec.display_target(),
            username = %username,
            "Establishing connection"
        );

        let connected = match plan {
            ConnectionPlan::DirectUri(uri) => {
                let uri = ConnectionUri::verbatim(uri);
                let store = self.connect(&runtime, &uri, spec.timeout())?;
                Connected::new(store, uri.redacted())
            }
            ConnectionPlan::SshTunnel => self.connect_tunneled(&runtime, spec, &username)?,
            ConnectionPlan::Ldap => self.with_fallback(&runtime, spec, || {
                self.connect_ldap(&runtime, spec, &username)
            })?,
            ConnectionPlan::Plain => self.with_fallback(&runtime, spec, || {
                self.connect(&runtime, &uri::plain_uri(spec), spec.timeout())
            })?,
        };

        tracing::info!(
            connection_id = %id,
            target = %connected.target,
            tunneled = connected.tunnel.is_some(),
            fell_back_to_localhost = connected.fell_back_to_localhost,
            "Connection established"
        );
        Ok(ClientHandle::assemble(runtime, id, username, connected))
    }

    fn connect(
        &self,
        runtime: &Runtime,
        uri: &ConnectionUri,
        timeout: Duration,
    ) -> DbCommResult<Arc<dyn DocumentStore>> {
        runtime.block_on(self.connector.connect(uri, timeout))
    }

    /// Run `attempt`; on a connectivity failure retry once against localhost
    /// when `localhost_fallback` is set. The original error wins if both fail.
    fn with_fallback(
        &self,
        runtime: &Runtime,
        spec: &ConnectionSpec,
        attempt: impl FnOnce() -> DbCommResult<Arc<dyn DocumentStore>>,
    ) -> DbCommResult<Connected> {
        let err = match attempt() {
            Ok(store) => return Ok(Connected::new(store, spec.display_target())),
            Err(e) if spec.localhost_fallback && e.is_connectivity() => e,
            Err(e) => return Err(e),
        };

        let fallback = uri::localhost_uri();
        tracing::warn!(
            target = %spec.display_target(),
            error = %err,
            fallback = %fallback,
            "Store unreachable, falling back to localhost"
        );
        match self.connect(runtime, &fallback, spec.timeout()) {
            Ok(store) => Ok(Connected {
                fell_back_to_localhost: true,
                ..Connected::new(store, fallback.redacted())
            }),
            Err(fallback_err) => {
                tracing::warn!(error = %fallback_err, "Localhost fallback failed");
                Err(err)
            }
        }
    }

    fn connect_ldap(
        &self,
        runtime: &Runtime,
        spec: &ConnectionSpec,
        username: &str,
    ) -> DbCommResult<Arc<dyn DocumentStore>> {
        let request = SecretRequest::store_password(username, spec.display_target());
        let max_attempts = spec.max_auth_attempts;
        let mut configured = spec.password.clone();
        let mut last_rejection: Option<DbCommError> = None;

        for attempt in 1..=max_attempts {
            let (password, prompted) = match configured.take() {
                Some(password) => (password, false),
                None => match self.credentials.secret(&request, attempt) {
                    Ok(password) => (password, true),
                    // The server's rejection outranks a provider with nothing more to offer.
                    Err(e) => return Err(last_rejection.unwrap_or(e)),
                },
            };

            let uri = uri::ldap_uri(spec, username, password.expose());
            match self.connect(runtime, &uri, spec.timeout()) {
                Ok(store) => {
                    if prompted {
                        self.credentials.accepted(&request, &password);
                    }
                    return Ok(store);
                }
                Err(e) if e.is_auth_failure() => {
                    tracing::warn!(attempt, max_attempts, username, "LDAP authentication rejected");
                    if prompted {
                        self.credentials.rejected(&request);
                    }
                    if max_attempts == 1 {
                        return Err(e);
                    }
                    last_rejection = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DbCommError::AuthRetriesExhausted { attempts: max_attempts })
    }

    fn connect_tunneled(
        &self,
        runtime: &Runtime,
        spec: &ConnectionSpec,
        username: &str,
    ) -> DbCommResult<Connected> {
        let ssh = spec
            .ssh
            .as_ref()
            .ok_or_else(|| DbCommError::internal("SSH plan chosen without SSH settings"))?;
        let remote_host = spec
            .host
            .primary()
            .ok_or_else(|| DbCommError::config("Host is required"))?
            .to_string();
        let ssh_username = ssh.username.clone().unwrap_or_else(|| username.to_string());
        let ssh_target = format!("{}:{}", ssh.host, ssh.port);

        let mut prompted: Option<(SecretRequest, SecretString)> = None;
        let auth = match &ssh.auth {
            SshAuth::Password { password: Some(password) } => TunnelAuth::Password(password.clone()),
            SshAuth::Password { password: None } => {
                let request = SecretRequest::ssh_password(&ssh_username, &ssh_target);
                let password = self.credentials.secret(&request, 1)?;
                prompted = Some((request, password.clone()));
                TunnelAuth::Password(password)
            }
            SshAuth::KeyFile { path, passphrase } => {
                TunnelAuth::KeyFile { path: path.clone(), passphrase: passphrase.clone() }
            }
        };

        let request = TunnelRequest {
            ssh_host: ssh.host.clone(),
            ssh_port: ssh.port,
            username: ssh_username,
            auth,
            remote_host,
            remote_port: spec.port,
            connect_timeout: Duration::from_millis(ssh.connect_timeout_ms),
        };
        let tunnel = runtime.block_on(self.tunnels.start(request))?;
        if let Some((request, password)) = prompted {
            self.credentials.accepted(&request, &password);
        }

        let credentials = spec.password.as_ref().map(|password| (username, password.expose()));
        let uri = uri::tunnel_uri(
            tunnel.local_port,
            credentials,
            spec.database.as_deref(),
            spec.tunnel_tls,
        );

        match self.connect(runtime, &uri, spec.timeout()) {
            Ok(store) => Ok(Connected {
                tunnel: Some(tunnel),
                ..Connected::new(store, format!("{} via {ssh_target}", spec.display_target()))
            }),
            Err(e) => {
                tunnel.stop();
                Err(e)
            }
        }
    }
}

impl Default for ConnectionEstablisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostSpec, SshTunnelSpec, TlsPolicy};
    use crate::services::credentials::{SecretKind, StaticCredentialProvider};
    use crate::services::testing::{CountingCredentials, RecordingTunnels, ScriptedConnector};

    fn establisher(
        connector: &Arc<ScriptedConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ConnectionEstablisher {
        ConnectionEstablisher::new()
            .with_connector(connector.clone())
            .with_credentials(credentials)
            .with_tunnels(Arc::new(RecordingTunnels::default()))
    }

    #[test]
    fn test_plan_priority() {
        let uri = ConnectionSpec::new("mongodb://db:27017").with_ldap().with_ssh(SshTunnelSpec::new("b"));
        assert_eq!(plan(&uri), ConnectionPlan::DirectUri("mongodb://db:27017".to_string()));

        let ssh = ConnectionSpec::new("db").with_ldap().with_ssh(SshTunnelSpec::new("bastion"));
        assert_eq!(plan(&ssh), ConnectionPlan::SshTunnel);

        assert_eq!(plan(&ConnectionSpec::new("db").with_ldap()), ConnectionPlan::Ldap);
        assert_eq!(plan(&ConnectionSpec::new("db")), ConnectionPlan::Plain);
    }

    #[test]
    fn test_plain_connect_uses_host_list() {
        let connector = Arc::new(ScriptedConnector::default());
        let spec = ConnectionSpec::new(HostSpec::List(vec!["h1".into(), "h2".into()]));
        let handle = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&spec)
            .unwrap();

        assert_eq!(connector.uris(), vec!["mongodb://h1:27017,h2:27017/"]);
        assert!(handle.tunnel().is_none());
        assert!(!handle.fell_back_to_localhost());
        handle.close();
    }

    #[test]
    fn test_ldap_uses_configured_password_without_prompting() {
        let connector = Arc::new(ScriptedConnector::default());
        let credentials = Arc::new(CountingCredentials::new("unused"));
        let spec = ConnectionSpec::new("db").with_ldap().with_username("jdoe").with_password("pw");

        let handle = establisher(&connector, credentials.clone()).establish(&spec).unwrap();
        assert_eq!(credentials.asked(), 0);
        assert!(connector.uris()[0].starts_with("mongodb://jdoe:pw@db:27017/?authMechanism=PLAIN"));
        assert_eq!(handle.username(), "jdoe");
        handle.close();
    }

    #[test]
    fn test_ldap_retries_then_succeeds() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![
            Err(DbCommError::auth_failed("bad")),
            Ok(()),
        ]));
        let credentials = Arc::new(CountingCredentials::new("pw"));
        let spec = ConnectionSpec::new("db").with_ldap().with_username("jdoe");

        let handle = establisher(&connector, credentials.clone()).establish(&spec).unwrap();
        assert_eq!(credentials.asked(), 2);
        assert_eq!(credentials.rejections(), 1);
        assert_eq!(credentials.acceptances(), 1);
        handle.close();
    }

    #[test]
    fn test_ldap_single_attempt_surfaces_auth_failure() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(
            DbCommError::auth_failed("bad"),
        )]));
        let spec = ConnectionSpec::new("db").with_ldap().with_max_auth_attempts(1);
        let err = establisher(&connector, Arc::new(CountingCredentials::new("pw")))
            .establish(&spec)
            .unwrap_err();
        assert!(matches!(err, DbCommError::AuthFailed { .. }));
    }

    #[test]
    fn test_ldap_retries_exhausted() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![
            Err(DbCommError::auth_failed("bad")),
            Err(DbCommError::auth_failed("bad")),
            Err(DbCommError::auth_failed("bad")),
        ]));
        let credentials = Arc::new(CountingCredentials::new("pw"));
        let spec = ConnectionSpec::new("db").with_ldap().with_max_auth_attempts(3);

        let err = establisher(&connector, credentials.clone()).establish(&spec).unwrap_err();
        assert!(matches!(err, DbCommError::AuthRetriesExhausted { attempts: 3 }));
        assert_eq!(connector.uris().len(), 3);
        assert_eq!(credentials.asked(), 3);
        assert_eq!(credentials.rejections(), 3);
        assert_eq!(credentials.acceptances(), 0);
    }

    #[test]
    fn test_rejected_configured_password_without_provider_secret_is_auth_failure() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(
            DbCommError::auth_failed("bad"),
        )]));
        let spec = ConnectionSpec::new("db").with_ldap().with_password("wrong");

        let err = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&spec)
            .unwrap_err();
        assert!(matches!(err, DbCommError::AuthFailed { .. }), "got {err:?}");
        assert!(err.is_auth_failure());
        assert_eq!(connector.uris().len(), 1);
    }

    #[test]
    fn test_missing_secret_before_any_attempt_is_credential_error() {
        let connector = Arc::new(ScriptedConnector::default());
        let spec = ConnectionSpec::new("db").with_ldap();

        let err = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&spec)
            .unwrap_err();
        assert_eq!(err.category(), "Credential");
        assert!(connector.uris().is_empty());
    }

    #[test]
    fn test_timeout_is_not_retried() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(
            DbCommError::timeout("no server", 5000),
        )]));
        let credentials = Arc::new(CountingCredentials::new("pw"));
        let spec = ConnectionSpec::new("db").with_ldap();

        let err = establisher(&connector, credentials.clone()).establish(&spec).unwrap_err();
        assert!(matches!(err, DbCommError::Timeout { .. }));
        assert_eq!(credentials.asked(), 1);
        assert_eq!(connector.uris().len(), 1);
    }

    #[test]
    fn test_localhost_fallback_is_reported() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![
            Err(DbCommError::unreachable("refused")),
            Ok(()),
        ]));
        let spec = ConnectionSpec::new("remote").with_localhost_fallback(true);
        let handle = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&spec)
            .unwrap();

        assert!(handle.fell_back_to_localhost());
        assert_eq!(connector.uris()[1], "mongodb://localhost:27017/");
        handle.close();
    }

    #[test]
    fn test_fallback_off_surfaces_error() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(
            DbCommError::unreachable("refused"),
        )]));
        let err = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&ConnectionSpec::new("remote"))
            .unwrap_err();
        assert!(matches!(err, DbCommError::Unreachable { .. }));
        assert_eq!(connector.uris().len(), 1);
    }

    #[test]
    fn test_tunnel_prompts_for_ssh_password_and_forwards_primary_host() {
        let connector = Arc::new(ScriptedConnector::default());
        let tunnels = Arc::new(RecordingTunnels::default());
        let credentials =
            Arc::new(StaticCredentialProvider::new().with_secret(SecretKind::SshPassword, "ssh-pw"));
        let spec = ConnectionSpec::new(HostSpec::List(vec!["db1".into(), "db2".into()]))
            .with_username("jdoe")
            .with_database("lab")
            .with_tunnel_tls(TlsPolicy::Strict)
            .with_ssh(SshTunnelSpec::new("bastion"));

        let handle = ConnectionEstablisher::new()
            .with_connector(connector.clone())
            .with_credentials(credentials)
            .with_tunnels(tunnels.clone())
            .establish(&spec)
            .unwrap();

        let request = tunnels.last_request().unwrap();
        assert_eq!(request.remote_host, "db1");
        assert_eq!(request.username, "jdoe");
        assert!(matches!(request.auth, TunnelAuth::Password(ref p) if p.expose() == "ssh-pw"));
        assert_eq!(
            connector.uris(),
            vec![format!(
                "mongodb://127.0.0.1:{}/lab?tls=true&directConnection=true",
                RecordingTunnels::LOCAL_PORT
            )]
        );

        let token = tunnels.last_token().unwrap();
        assert!(!token.is_cancelled());
        handle.close();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_tunnel_stopped_when_store_connect_fails() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(
            DbCommError::timeout("no server", 100),
        )]));
        let tunnels = Arc::new(RecordingTunnels::default());
        let spec = ConnectionSpec::new("db")
            .with_ssh(SshTunnelSpec::new("bastion").with_password("pw"));

        let result = ConnectionEstablisher::new()
            .with_connector(connector)
            .with_credentials(Arc::new(StaticCredentialProvider::new()))
            .with_tunnels(tunnels.clone())
            .establish(&spec);

        assert!(matches!(result, Err(DbCommError::Timeout { .. })));
        assert!(tunnels.last_token().unwrap().is_cancelled());
    }

    #[test]
    fn test_invalid_spec_rejected_before_connecting() {
        let connector = Arc::new(ScriptedConnector::default());
        let err = establisher(&connector, Arc::new(StaticCredentialProvider::new()))
            .establish(&ConnectionSpec::new("db").with_timeout_ms(0))
            .unwrap_err();
        assert_eq!(err.category(), "Config");
        assert!(connector.uris().is_empty());
    }
}
