//! Error types for dbcomm.
//!
//! One taxonomy covers connection establishment, session operations and the
//! ambient concerns around them (credentials, config, SSH, local I/O).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type DbCommResult<T> = Result<T, DbCommError>;

/// Main error type for dbcomm.
#[derive(Debug, Error)]
pub enum DbCommError {
    /// A connection attempt did not complete within its timeout.
    #[error("Connection timed out{}: {message}", elapsed_suffix(.timeout_ms))]
    Timeout {
        /// Human-readable error message.
        message: String,
        /// The timeout that elapsed; 0 when the driver did not report it.
        timeout_ms: u64,
    },

    /// The store rejected the supplied credentials.
    #[error("Authentication failed: {message}")]
    AuthFailed {
        /// Human-readable error message.
        message: String,
    },

    /// Every allowed authentication attempt was rejected.
    #[error("Authentication failed after {attempts} attempts")]
    AuthRetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The store could not be reached or the driver failed.
    #[error("Store unreachable: {message}")]
    Unreachable {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A database or collection is absent from the cached listing.
    #[error("Not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Malformed filter, identifier or update type.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable error message.
        message: String,
    },

    /// SSH tunnel setup or forwarding error.
    #[error("SSH error: {message}")]
    Ssh {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Obtaining or storing a secret failed.
    #[error("Credential error: {message}")]
    Credential {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Configuration error.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Local file I/O error (config files, blob uploads).
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl DbCommError {
    // ========== Constructors ==========

    /// Create a new timeout error.
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { message: message.into(), timeout_ms }
    }

    /// Create a new authentication error.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed { message: message.into() }
    }

    /// Create a new unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable { message: message.into(), source: None }
    }

    /// Create a new unreachable error with source.
    pub fn unreachable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unreachable { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a new SSH error.
    pub fn ssh(message: impl Into<String>) -> Self {
        Self::Ssh { message: message.into(), hint: None }
    }

    /// Create a new SSH error with an actionable hint.
    pub fn ssh_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Ssh { message: message.into(), hint: Some(hint.into()) }
    }

    /// Create a new credential error.
    pub fn credential(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Credential { message: message.into(), hint: hint.map(String::from) }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), source: None }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // ========== Methods ==========

    /// Check if this error is a credential rejection (single or exhausted).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed { .. } | Self::AuthRetriesExhausted { .. })
    }

    /// Check if the store could not be reached in time or at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Timeout",
            Self::AuthFailed { .. } | Self::AuthRetriesExhausted { .. } => "Authentication",
            Self::Unreachable { .. } => "Connection",
            Self::NotFound { .. } => "NotFound",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::Ssh { .. } => "SSH",
            Self::Credential { .. } => "Credential",
            Self::Config { .. } => "Config",
            Self::Io { .. } => "IO",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Timeout { .. } => Some("Server timeout. Check connection details"),
            Self::AuthFailed { .. } => Some("Check username and password"),
            Self::AuthRetriesExhausted { .. } => Some("Too many failed password attempts"),
            Self::Unreachable { .. } => Some("Check that the database server is running"),
            Self::NotFound { .. } => Some("Refresh the database or collection listing"),
            Self::InvalidArgument { .. } => None,
            Self::Ssh { hint, .. } => hint.as_deref(),
            Self::Credential { hint, .. } => hint.as_deref(),
            Self::Config { .. } => None,
            Self::Io { .. } => Some("Check file permissions and disk space"),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }
}

fn elapsed_suffix(timeout_ms: &u64) -> String {
    match timeout_ms {
        0 => String::new(),
        ms => format!(" after {ms}ms"),
    }
}

// ========== Error Conversions ==========

/// MongoDB "AuthenticationFailed" server error code.
const MONGO_AUTH_FAILED_CODE: i32 = 18;

/// Convert from mongodb::error::Error to DbCommError.
///
/// Server selection failures mean no server answered within the configured
/// timeout, so they map to `Timeout`. The timeout value is not carried by the
/// driver error and is filled in by the caller when known.
impl From<mongodb::error::Error> for DbCommError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, GridFsErrorKind};

        match err.kind.as_ref() {
            ErrorKind::ServerSelection { message, .. } => {
                DbCommError::Timeout { message: message.clone(), timeout_ms: 0 }
            }
            ErrorKind::Authentication { message, .. } => {
                DbCommError::AuthFailed { message: message.clone() }
            }
            ErrorKind::Command(command) if command.code == MONGO_AUTH_FAILED_CODE => {
                DbCommError::AuthFailed { message: command.message.clone() }
            }
            ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }) => {
                DbCommError::NotFound { message: err.to_string() }
            }
            ErrorKind::InvalidArgument { message, .. } => {
                DbCommError::InvalidArgument { message: message.clone() }
            }
            _ => DbCommError::Unreachable { message: err.to_string(), source: Some(Box::new(err)) },
        }
    }
}

/// Convert from std::io::Error to DbCommError.
impl From<std::io::Error> for DbCommError {
    fn from(err: std::io::Error) -> Self {
        DbCommError::Io { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error to DbCommError.
impl From<serde_json::Error> for DbCommError {
    fn from(err: serde_json::Error) -> Self {
        DbCommError::Config { message: format!("JSON error: {err}") }
    }
}

/// Convert from bson::oid::Error to DbCommError.
impl From<bson::oid::Error> for DbCommError {
    fn from(err: bson::oid::Error) -> Self {
        DbCommError::InvalidArgument { message: format!("Invalid ObjectId: {err}") }
    }
}

/// Convert from keyring::Error to DbCommError.
impl From<keyring::Error> for DbCommError {
    fn from(err: keyring::Error) -> Self {
        DbCommError::Credential {
            message: err.to_string(),
            hint: Some("Grant dbcomm access to the system keychain".to_string()),
        }
    }
}
