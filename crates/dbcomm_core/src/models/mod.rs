//! Data models for dbcomm.
//!
//! - `connection` - ConnectionSpec, HostSpec, AuthMode, SshTunnelSpec, TlsPolicy
//! - `record` - RecordSelector, UpdateKind, TaggedDocument
//! - `session` - SessionState

pub mod connection;
pub mod record;
pub mod session;

pub use connection::{
    AuthMode, ConnectionSpec, HostSpec, SecretString, SshAuth, SshTunnelSpec, TlsPolicy,
};
pub use record::{IntoObjectId, RecordSelector, TaggedDocument, UpdateKind, UpdateOutcome};
pub use session::SessionState;
