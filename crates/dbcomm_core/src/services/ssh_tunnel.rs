//! SSH local port forwarding.
//!
//! A tunnel binds `127.0.0.1:0`, and every accepted socket is carried over a
//! `direct-tcpip` channel to the remote store. The forwarding task runs on the
//! caller's runtime until the handle is stopped.

use crate::error::{DbCommError, DbCommResult};
use crate::models::SecretString;

use async_trait::async_trait;
use russh::client;
use russh_keys::key::KeyPair;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// SSH credentials after any prompting has happened.
#[derive(Clone)]
pub enum TunnelAuth {
    /// Password login.
    Password(SecretString),
    /// Private key login.
    KeyFile {
        /// Path to the private key.
        path: PathBuf,
        /// Passphrase for an encrypted key.
        passphrase: Option<SecretString>,
    },
}

impl std::fmt::Debug for TunnelAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password"),
            Self::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

/// Everything needed to open one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// SSH server host.
    pub ssh_host: String,
    /// SSH server port.
    pub ssh_port: u16,
    /// SSH login name.
    pub username: String,
    /// SSH credentials.
    pub auth: TunnelAuth,
    /// Host the SSH server forwards to.
    pub remote_host: String,
    /// Port the SSH server forwards to.
    pub remote_port: u16,
    /// Bound on connecting and authenticating.
    pub connect_timeout: Duration,
}

impl TunnelRequest {
    /// `host:port` of the SSH server.
    pub fn ssh_target(&self) -> String {
        format!("{}:{}", self.ssh_host, self.ssh_port)
    }
}

/// Handle to an active SSH tunnel.
///
/// Owned by whoever opened it and released with [`SshTunnelHandle::stop`].
/// Dropping a running handle still cancels forwarding but logs a warning.
pub struct SshTunnelHandle {
    /// Tunnel id used in log events
    pub id: Uuid,
    /// Local port the tunnel is listening on
    pub local_port: u16,
    /// Remote host being tunneled to
    pub remote_host: String,
    /// Remote port being tunneled to
    pub remote_port: u16,
    cancel_token: CancellationToken,
    stopped: AtomicBool,
}

impl SshTunnelHandle {
    /// Wrap a forwarding task controlled by `cancel_token`.
    pub fn new(
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            cancel_token,
            stopped: AtomicBool::new(false),
        }
    }

    /// Stop forwarding. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_token.cancel();
        tracing::info!(tunnel_id = %self.id, local_port = self.local_port, "SSH tunnel stopped");
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SshTunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnelHandle")
            .field("id", &self.id)
            .field("local_port", &self.local_port)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for SshTunnelHandle {
    fn drop(&mut self) {
        if !self.is_stopped() {
            tracing::warn!(
                tunnel_id = %self.id,
                local_port = self.local_port,
                "SSH tunnel dropped without being stopped"
            );
            self.cancel_token.cancel();
        }
    }
}

/// Starts tunnels. Must be called from within a tokio runtime.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Open a tunnel and return once its local port is listening.
    async fn start(&self, request: TunnelRequest) -> DbCommResult<SshTunnelHandle>;
}

/// SSH client handler for russh.
struct SshClientHandler;

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: verify against ~/.ssh/known_hosts before trusting the server key
        Ok(true)
    }
}

type SshSession = client::Handle<SshClientHandler>;

/// `russh`-backed tunnel provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTunnelService;

impl SshTunnelService {
    /// Create a new service.
    pub fn new() -> Self {
        Self
    }

    async fn connect_ssh(request: &TunnelRequest) -> DbCommResult<SshSession> {
        let config = Arc::new(client::Config::default());
        let target = request.ssh_target();

        let connect = client::connect(
            config,
            (request.ssh_host.as_str(), request.ssh_port),
            SshClientHandler,
        );
        let mut session = tokio::time::timeout(request.connect_timeout, connect)
            .await
            .map_err(|_| {
                DbCommError::ssh_with_hint(
                    format!("Timed out connecting to SSH server {target}"),
                    "Verify the SSH host and port",
                )
            })?
            .map_err(|e| {
                DbCommError::ssh_with_hint(
                    format!("Failed to connect to SSH server {target}: {e}"),
                    "Verify the SSH server is running and reachable",
                )
            })?;

        let authenticated = match &request.auth {
            TunnelAuth::Password(password) => session
                .authenticate_password(&request.username, password.expose())
                .await
                .map_err(|e| DbCommError::ssh(format!("SSH password authentication failed: {e}")))?,
            TunnelAuth::KeyFile { path, passphrase } => {
                let key = Self::load_private_key(path, passphrase.as_ref()).await?;
                session
                    .authenticate_publickey(&request.username, key)
                    .await
                    .map_err(|e| DbCommError::ssh(format!("SSH key authentication failed: {e}")))?
            }
        };

        if !authenticated {
            return Err(DbCommError::ssh_with_hint(
                format!("SSH server {target} rejected {}", request.username),
                "Check the SSH username and credentials",
            ));
        }

        tracing::info!(username = %request.username, ssh_target = %target, "SSH authentication successful");
        Ok(session)
    }

    async fn load_private_key(
        path: &Path,
        passphrase: Option<&SecretString>,
    ) -> DbCommResult<Arc<KeyPair>> {
        let key_data = tokio::fs::read_to_string(path).await.map_err(|e| {
            DbCommError::ssh_with_hint(
                format!("Failed to read SSH key {}: {e}", path.display()),
                "Check that the key file exists and is readable",
            )
        })?;

        let key = russh_keys::decode_secret_key(&key_data, passphrase.map(SecretString::expose))
            .map_err(|e| {
                DbCommError::ssh_with_hint(
                    format!("Failed to decode SSH key {}: {e}", path.display()),
                    "An encrypted key needs its passphrase",
                )
            })?;
        Ok(Arc::new(key))
    }

    async fn run_tunnel(
        listener: TcpListener,
        session: Arc<SshSession>,
        remote_host: String,
        remote_port: u16,
        tunnel_id: Uuid,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((local_stream, peer)) => {
                        tracing::debug!(%tunnel_id, %peer, "Tunnel connection accepted");
                        let session = session.clone();
                        let remote_host = remote_host.clone();
                        let cancel = cancel_token.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::forward_connection(
                                local_stream,
                                session,
                                &remote_host,
                                remote_port,
                                cancel,
                            )
                            .await
                            {
                                tracing::warn!(%tunnel_id, error = %e, "Tunnel forwarding failed");
                            }
                        });
                    }
                    Err(e) => tracing::error!(%tunnel_id, error = %e, "Failed to accept tunnel connection"),
                },
                _ = cancel_token.cancelled() => break,
            }
        }

        if let Err(e) = session.disconnect(russh::Disconnect::ByApplication, "", "en").await {
            tracing::debug!(%tunnel_id, error = %e, "SSH disconnect failed");
        }
        tracing::debug!(%tunnel_id, "Tunnel forwarding loop finished");
    }

    async fn forward_connection(
        mut local_stream: TcpStream,
        session: Arc<SshSession>,
        remote_host: &str,
        remote_port: u16,
        cancel_token: CancellationToken,
    ) -> DbCommResult<()> {
        let channel = session
            .channel_open_direct_tcpip(remote_host, u32::from(remote_port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                DbCommError::ssh_with_hint(
                    format!("Failed to open SSH channel to {remote_host}:{remote_port}: {e}"),
                    "The SSH server may not allow TCP forwarding",
                )
            })?;
        let mut channel = Box::pin(channel.into_stream());

        tokio::select! {
            copied = tokio::io::copy_bidirectional(&mut local_stream, &mut channel) => {
                let (sent, received) = copied?;
                tracing::trace!(sent, received, "Tunnel connection closed");
            }
            _ = cancel_token.cancelled() => {}
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelProvider for SshTunnelService {
    async fn start(&self, request: TunnelRequest) -> DbCommResult<SshTunnelHandle> {
        tracing::info!(
            ssh_target = %request.ssh_target(),
            remote_host = %request.remote_host,
            remote_port = request.remote_port,
            "Establishing SSH tunnel"
        );

        let session = Arc::new(Self::connect_ssh(&request).await?);

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| {
            DbCommError::ssh(format!("Failed to bind local port for SSH tunnel: {e}"))
        })?;
        let local_port = listener.local_addr()?.port();

        let cancel_token = CancellationToken::new();
        let handle = SshTunnelHandle::new(
            local_port,
            request.remote_host.clone(),
            request.remote_port,
            cancel_token.clone(),
        );
        tracing::info!(tunnel_id = %handle.id, local_port, "SSH tunnel listening");

        tokio::spawn(Self::run_tunnel(
            listener,
            session,
            request.remote_host,
            request.remote_port,
            handle.id,
            cancel_token,
        ));

        Ok(handle)
    }
}
