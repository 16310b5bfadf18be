//! Connection settings models.

use crate::error::{DbCommError, DbCommResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default MongoDB port.
pub const DEFAULT_PORT: u16 = 27017;

/// Default connection timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of LDAP password attempts before giving up.
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 5;

/// Acting username when neither the settings nor the environment name one.
pub const UNKNOWN_USER: &str = "unknown";

/// URI scheme prefixes recognised as a complete connection string.
pub const URI_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

/// A secret string that never appears in `Debug` output or serialized config.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One host, a list of replica-set members, or a full connection URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostSpec {
    /// A hostname, IP address, or a complete `mongodb://` URI.
    Single(String),
    /// Several hosts sharing the same port.
    List(Vec<String>),
}

impl HostSpec {
    /// Return the URI if this host is already a complete connection string.
    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Self::Single(host) if URI_SCHEMES.iter().any(|scheme| host.contains(scheme)) => {
                Some(host.as_str())
            }
            _ => None,
        }
    }

    /// All host names in order.
    pub fn hosts(&self) -> Vec<&str> {
        match self {
            Self::Single(host) => vec![host.as_str()],
            Self::List(hosts) => hosts.iter().map(String::as_str).collect(),
        }
    }

    /// Join every host with the port as `h1:p,h2:p`.
    pub fn join_with_port(&self, port: u16) -> String {
        self.hosts().iter().map(|host| format!("{host}:{port}")).collect::<Vec<_>>().join(",")
    }

    /// First host, used as the tunnel's remote endpoint.
    pub fn primary(&self) -> Option<&str> {
        self.hosts().into_iter().next()
    }

    /// Whether more than one host is listed.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl From<&str> for HostSpec {
    fn from(host: &str) -> Self {
        Self::Single(host.to_string())
    }
}

impl From<String> for HostSpec {
    fn from(host: String) -> Self {
        Self::Single(host)
    }
}

impl From<Vec<String>> for HostSpec {
    fn from(hosts: Vec<String>) -> Self {
        Self::List(hosts)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(host) => f.write_str(host),
            Self::List(hosts) => f.write_str(&hosts.join(",")),
        }
    }
}

/// Authentication mode for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No credentials.
    #[default]
    None,
    /// LDAP bind through the PLAIN mechanism against `$external`.
    Ldap,
}

impl AuthMode {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ldap => "ldap",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> DbCommResult<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "ldap" => Ok(Self::Ldap),
            other => Err(DbCommError::config(format!(
                "Authentication method '{other}' is not supported"
            ))),
        }
    }
}

/// Certificate handling for the TLS session carried through an SSH tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// TLS on, certificate validation off. The tunnel is the trust boundary.
    #[default]
    AllowInvalidCertificates,
    /// TLS on with full certificate validation.
    Strict,
}

/// SSH authentication method.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuth {
    /// Password authentication; prompted when absent.
    Password {
        /// The SSH password, if already known.
        #[serde(default, skip_serializing)]
        password: Option<SecretString>,
    },
    /// Private key file authentication.
    KeyFile {
        /// Path to the private key.
        path: PathBuf,
        /// Passphrase for an encrypted key.
        #[serde(default, skip_serializing)]
        passphrase: Option<SecretString>,
    },
}

impl Default for SshAuth {
    fn default() -> Self {
        Self::Password { password: None }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { password } => f
                .debug_struct("Password")
                .field("password", &password.as_ref().map(|_| "***"))
                .finish(),
            Self::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout_ms() -> u64 {
    10_000
}

/// SSH tunnel settings. Presence on a `ConnectionSpec` enables tunneling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTunnelSpec {
    /// SSH server hostname
    pub host: String,
    /// SSH server port (default 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH username; defaults to the database username
    #[serde(default)]
    pub username: Option<String>,
    /// Authentication method
    #[serde(default)]
    pub auth: SshAuth,
    /// Handshake timeout in milliseconds
    #[serde(default = "default_ssh_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl SshTunnelSpec {
    /// Create a tunnel spec using password authentication on port 22.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: None,
            auth: SshAuth::default(),
            connect_timeout_ms: default_ssh_timeout_ms(),
        }
    }

    /// Set the SSH username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set a known SSH password.
    pub fn with_password(mut self, password: impl Into<SecretString>) -> Self {
        self.auth = SshAuth::Password { password: Some(password.into()) };
        self
    }

    /// Use key-based authentication.
    pub fn with_key(mut self, path: impl Into<PathBuf>, passphrase: Option<SecretString>) -> Self {
        self.auth = SshAuth::KeyFile { path: path.into(), passphrase };
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_auth_attempts() -> u32 {
    DEFAULT_MAX_AUTH_ATTEMPTS
}

/// Everything needed to decide how to reach a document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Hostname, host list, or full connection URI
    pub host: HostSpec,
    /// Server port (default 27017)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Authentication mode
    #[serde(default)]
    pub authentication: AuthMode,
    /// Login username; the current OS user when absent
    #[serde(default)]
    pub username: Option<String>,
    /// Login password; never serialized
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    /// Optional SSH tunnel settings
    #[serde(default)]
    pub ssh: Option<SshTunnelSpec>,
    /// Target database name
    #[serde(default)]
    pub database: Option<String>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on LDAP password attempts
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
    /// Replica set name appended to LDAP URIs
    #[serde(default)]
    pub replica_set: Option<String>,
    /// Certificate policy for the tunneled connection
    #[serde(default)]
    pub tunnel_tls: TlsPolicy,
    /// Retry against localhost:27017 when the remote store cannot be reached
    #[serde(default)]
    pub localhost_fallback: bool,
}

impl ConnectionSpec {
    /// Create a spec for `host` with every other field at its default.
    pub fn new(host: impl Into<HostSpec>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            authentication: AuthMode::None,
            username: None,
            password: None,
            ssh: None,
            database: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            replica_set: None,
            tunnel_tls: TlsPolicy::default(),
            localhost_fallback: false,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use LDAP authentication.
    pub fn with_ldap(mut self) -> Self {
        self.authentication = AuthMode::Ldap;
        self
    }

    /// Set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<SecretString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Tunnel through SSH.
    pub fn with_ssh(mut self, ssh: SshTunnelSpec) -> Self {
        self.ssh = Some(ssh);
        self
    }

    /// Set the target database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the connection timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the LDAP attempt bound.
    pub fn with_max_auth_attempts(mut self, attempts: u32) -> Self {
        self.max_auth_attempts = attempts;
        self
    }

    /// Set the replica set name.
    pub fn with_replica_set(mut self, replica_set: impl Into<String>) -> Self {
        self.replica_set = Some(replica_set.into());
        self
    }

    /// Set the tunnel certificate policy.
    pub fn with_tunnel_tls(mut self, policy: TlsPolicy) -> Self {
        self.tunnel_tls = policy;
        self
    }

    /// Enable the localhost fallback.
    pub fn with_localhost_fallback(mut self, enabled: bool) -> Self {
        self.localhost_fallback = enabled;
        self
    }

    /// Connection timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether SSH tunneling is requested.
    pub fn uses_ssh(&self) -> bool {
        self.ssh.is_some()
    }

    /// The acting username: the configured one, else the current OS user.
    pub fn effective_username(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => username.clone(),
            _ => current_os_user().unwrap_or_else(|| UNKNOWN_USER.to_string()),
        }
    }

    /// Validate the settings. Only host and timeout are checked for a full URI.
    pub fn validate(&self) -> DbCommResult<()> {
        let hosts = self.host.hosts();
        if hosts.is_empty() || hosts.iter().any(|host| host.trim().is_empty()) {
            return Err(DbCommError::config("Host is required"));
        }
        if self.timeout_ms == 0 {
            return Err(DbCommError::config("Timeout must be greater than zero"));
        }
        // A full URI is used verbatim; port, auth and SSH settings are ignored.
        if self.host.as_uri().is_some() {
            return Ok(());
        }
        if self.port == 0 {
            return Err(DbCommError::config("Port must be between 1 and 65535"));
        }
        if self.max_auth_attempts == 0 {
            return Err(DbCommError::config("At least one authentication attempt is required"));
        }
        if let Some(ref ssh) = self.ssh {
            if ssh.host.trim().is_empty() {
                return Err(DbCommError::config("SSH host is required when tunneling"));
            }
        }
        Ok(())
    }

    /// Display target without credentials.
    pub fn display_target(&self) -> String {
        match self.host.as_uri() {
            Some(uri) => crate::services::uri::redact(uri),
            None => self.host.join_with_port(self.port),
        }
    }
}

/// Current OS login name, looked up the way `getpass`-style helpers do.
pub fn current_os_user() -> Option<String> {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_spec_detects_uri() {
        assert_eq!(
            HostSpec::from("mongodb://db.example.com:27017").as_uri(),
            Some("mongodb://db.example.com:27017")
        );
        assert!(HostSpec::from("mongodb+srv://cluster.example.com").as_uri().is_some());
        assert_eq!(HostSpec::from("db.example.com").as_uri(), None);
        assert_eq!(HostSpec::List(vec!["mongodb://a".to_string()]).as_uri(), None);
    }

    #[test]
    fn test_join_with_port_preserves_order() {
        let hosts = HostSpec::List(vec!["h1".to_string(), "h2".to_string(), "h3".to_string()]);
        assert_eq!(hosts.join_with_port(27018), "h1:27018,h2:27018,h3:27018");
        assert_eq!(HostSpec::from("solo").join_with_port(1), "solo:1");
    }

    #[test]
    fn test_spec_defaults() {
        let spec = ConnectionSpec::new("localhost");
        assert_eq!(spec.port, 27017);
        assert_eq!(spec.timeout_ms, 5000);
        assert_eq!(spec.authentication, AuthMode::None);
        assert_eq!(spec.tunnel_tls, TlsPolicy::AllowInvalidCertificates);
        assert!(!spec.uses_ssh());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let json = r#"{
            "host": ["a.example.com", "b.example.com"],
            "authentication": "ldap",
            "username": "jdoe",
            "password": "hunter2",
            "ssh": { "host": "bastion", "auth": { "method": "password" } }
        }"#;
        let spec: ConnectionSpec = serde_json::from_str(json).unwrap();
        assert!(spec.host.is_list());
        assert_eq!(spec.port, 27017);
        assert_eq!(spec.authentication, AuthMode::Ldap);
        assert_eq!(spec.password.as_ref().map(SecretString::expose), Some("hunter2"));
        let ssh = spec.ssh.unwrap();
        assert_eq!(ssh.port, 22);
        assert_eq!(ssh.auth, SshAuth::Password { password: None });
    }

    #[test]
    fn test_password_is_never_serialized_or_debugged() {
        let spec = ConnectionSpec::new("db").with_password("hunter2");
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!format!("{spec:?}").contains("hunter2"));
    }

    #[test]
    fn test_validate_rejects_bad_specs() {
        assert!(ConnectionSpec::new("").validate().is_err());
        assert!(ConnectionSpec::new("db").with_timeout_ms(0).validate().is_err());
        assert!(ConnectionSpec::new("db").with_max_auth_attempts(0).validate().is_err());
        assert!(ConnectionSpec::new("db").with_ssh(SshTunnelSpec::new(" ")).validate().is_err());
    }

    #[test]
    fn test_validate_uri_skips_port_auth_and_ssh() {
        let uri = "mongodb://db1.example.com:27017/";
        assert!(ConnectionSpec::new(uri).with_port(0).validate().is_ok());
        assert!(ConnectionSpec::new(uri).with_max_auth_attempts(0).validate().is_ok());
        assert!(ConnectionSpec::new(uri).with_ssh(SshTunnelSpec::new("")).validate().is_ok());
        assert!(ConnectionSpec::new(uri).with_timeout_ms(0).validate().is_err());
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!(AuthMode::parse("LDAP").unwrap(), AuthMode::Ldap);
        assert_eq!(AuthMode::parse("none").unwrap(), AuthMode::None);
        assert!(AuthMode::parse("kerberos").is_err());
    }

    #[test]
    fn test_effective_username_prefers_configured() {
        let spec = ConnectionSpec::new("db").with_username("svc_reader");
        assert_eq!(spec.effective_username(), "svc_reader");
    }
}
