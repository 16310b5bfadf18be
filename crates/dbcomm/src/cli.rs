//! Command-line arguments.
//!
//! Connection flags mirror `ConnectionSpec`. A `--config` profile is loaded
//! first and any flag given on the command line overrides it.

use clap::{Args, Parser, Subcommand};
use dbcomm_core::config::{load_spec, CONFIG_ENV};
use dbcomm_core::{
    AuthMode, ConnectionSpec, DbCommError, DbCommResult, HostSpec, SecretString, SshAuth,
    SshTunnelSpec, TlsPolicy, UpdateKind,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dbcomm")]
#[command(about = "dbcomm - command-line client for MongoDB-compatible document stores")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Never prompt for passwords; fail when one is missing
    #[arg(long = "no-prompt", global = true)]
    pub no_prompt: bool,

    /// Remember accepted passwords in the OS keychain
    #[arg(long, global = true)]
    pub remember: bool,

    /// Log filter, e.g. "dbcomm_core=trace" (overrides DBCOMM_LOG)
    #[arg(long = "log-filter", global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// JSON connection profile
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Server host or full mongodb:// URI; repeat for a replica-set host list
    #[arg(long = "host", global = true, env = "DBCOMM_HOST")]
    pub hosts: Vec<String>,

    /// Server port
    #[arg(short, long, global = true, env = "DBCOMM_PORT")]
    pub port: Option<u16>,

    /// Authentication mode (none, ldap)
    #[arg(long, global = true, env = "DBCOMM_AUTH", value_parser = parse_auth_mode)]
    pub auth: Option<AuthMode>,

    /// Login username (defaults to the current OS user)
    #[arg(short, long, global = true, env = "DBCOMM_USER")]
    pub username: Option<String>,

    /// Login password (prompted when LDAP needs one)
    #[arg(long, global = true, env = "DBCOMM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Default database
    #[arg(long, global = true, env = "DBCOMM_DATABASE")]
    pub database: Option<String>,

    /// Server selection timeout in milliseconds
    #[arg(long = "timeout-ms", global = true, env = "DBCOMM_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Password attempts before giving up
    #[arg(long = "max-auth-attempts", global = true, env = "DBCOMM_MAX_AUTH_ATTEMPTS")]
    pub max_auth_attempts: Option<u32>,

    /// Replica set name used in generated URIs
    #[arg(long = "replica-set", global = true, env = "DBCOMM_REPLICA_SET")]
    pub replica_set: Option<String>,

    /// Validate TLS certificates through SSH tunnels
    #[arg(long = "strict-tunnel-tls", global = true)]
    pub strict_tunnel_tls: bool,

    /// Retry against localhost when the configured host is unreachable
    #[arg(long = "localhost-fallback", global = true)]
    pub localhost_fallback: bool,

    /// SSH bastion host; enables tunneling
    #[arg(long = "ssh-host", global = true, env = "DBCOMM_SSH_HOST")]
    pub ssh_host: Option<String>,

    /// SSH port
    #[arg(long = "ssh-port", global = true, env = "DBCOMM_SSH_PORT")]
    pub ssh_port: Option<u16>,

    /// SSH username (defaults to the login username)
    #[arg(long = "ssh-user", global = true, env = "DBCOMM_SSH_USER")]
    pub ssh_user: Option<String>,

    /// SSH password (prompted when neither it nor a key is given)
    #[arg(long = "ssh-password", global = true, env = "DBCOMM_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// SSH private key file
    #[arg(long = "ssh-key", global = true, env = "DBCOMM_SSH_KEY")]
    pub ssh_key: Option<PathBuf>,

    /// Passphrase for an encrypted SSH key
    #[arg(
        long = "ssh-key-passphrase",
        global = true,
        env = "DBCOMM_SSH_KEY_PASSPHRASE",
        hide_env_values = true
    )]
    pub ssh_key_passphrase: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List databases
    Databases,

    /// List collections in a database
    Collections { database: String },

    /// Show one record by id
    Get { database: String, collection: String, id: String },

    /// Find a record by id in any collection
    FindId { database: String, id: String },

    /// Find records matching a JSON filter in every collection
    Find {
        database: String,
        /// Filter document, e.g. '{"plate": 7}'
        filter: String,
    },

    /// Print every record in a collection
    List { database: String, collection: String },

    /// Insert a JSON record
    Insert { database: String, collection: String, record: String },

    /// Update one record by id
    Update {
        database: String,
        collection: String,
        id: String,
        /// Field values as a JSON document
        values: String,
        /// set overwrites fields, push appends to arrays
        #[arg(long, default_value = "set", value_parser = parse_update_kind)]
        kind: UpdateKind,
    },

    /// Delete one record, or every record when --id is absent
    Delete {
        database: String,
        collection: String,
        #[arg(long)]
        id: Option<String>,
    },

    /// Drop a collection
    Drop { database: String, collection: String },

    /// Store a local file as a blob
    PutFile { database: String, path: PathBuf },

    /// Write a blob to a local file
    GetFile { database: String, id: String, output: PathBuf },

    /// Delete a blob
    DeleteFile { database: String, id: String },
}

fn parse_auth_mode(s: &str) -> Result<AuthMode, String> {
    AuthMode::parse(s).map_err(|e| e.to_string())
}

fn parse_update_kind(s: &str) -> Result<UpdateKind, String> {
    UpdateKind::parse(s).map_err(|e| e.to_string())
}

impl ConnectionArgs {
    fn host_spec(&self) -> Option<HostSpec> {
        match self.hosts.as_slice() {
            [] => None,
            [single] => Some(HostSpec::Single(single.clone())),
            many => Some(HostSpec::List(many.to_vec())),
        }
    }

    fn has_ssh_details(&self) -> bool {
        self.ssh_port.is_some()
            || self.ssh_user.is_some()
            || self.ssh_password.is_some()
            || self.ssh_key.is_some()
    }

    /// Build the connection spec from the profile (if any) and the flags.
    pub fn to_spec(&self) -> DbCommResult<ConnectionSpec> {
        let mut spec = match (&self.config, self.host_spec()) {
            (Some(path), host) => {
                let mut spec = load_spec(path)?;
                if let Some(host) = host {
                    spec.host = host;
                }
                spec
            }
            (None, Some(host)) => ConnectionSpec::new(host),
            (None, None) => {
                return Err(DbCommError::config("No server given. Pass --host or --config"))
            }
        };

        if let Some(port) = self.port {
            spec.port = port;
        }
        if let Some(auth) = self.auth {
            spec.authentication = auth;
        }
        if let Some(username) = &self.username {
            spec.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            spec.password = Some(SecretString::new(password.as_str()));
        }
        if let Some(database) = &self.database {
            spec.database = Some(database.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            spec.timeout_ms = timeout_ms;
        }
        if let Some(attempts) = self.max_auth_attempts {
            spec.max_auth_attempts = attempts;
        }
        if let Some(replica_set) = &self.replica_set {
            spec.replica_set = Some(replica_set.clone());
        }
        if self.strict_tunnel_tls {
            spec.tunnel_tls = TlsPolicy::Strict;
        }
        if self.localhost_fallback {
            spec.localhost_fallback = true;
        }

        if let Some(host) = &self.ssh_host {
            spec.ssh = Some(SshTunnelSpec::new(host.as_str()));
        }
        match spec.ssh.as_mut() {
            Some(ssh) => self.apply_ssh(ssh),
            None if self.has_ssh_details() => {
                return Err(DbCommError::config("SSH options require --ssh-host"))
            }
            None => {}
        }

        spec.validate()?;
        Ok(spec)
    }

    fn apply_ssh(&self, ssh: &mut SshTunnelSpec) {
        if let Some(port) = self.ssh_port {
            ssh.port = port;
        }
        if let Some(user) = &self.ssh_user {
            ssh.username = Some(user.clone());
        }
        if let Some(path) = &self.ssh_key {
            ssh.auth = SshAuth::KeyFile {
                path: path.clone(),
                passphrase: self.ssh_key_passphrase.as_deref().map(SecretString::new),
            };
        } else if let Some(password) = &self.ssh_password {
            ssh.auth = SshAuth::Password { password: Some(SecretString::new(password.as_str())) };
        }
    }
}
