//! Core library for dbcomm, a thin client for MongoDB-compatible document stores.
//!
//! - **error**: `DbCommError` taxonomy and driver error classification
//! - **models**: Connection specs, record selectors, session state
//! - **services**: Connection establishment, session operations, credentials, SSH tunnels
//! - **config**: JSON connection profiles
//! - **logging**: Structured logging setup
//!
//! ```no_run
//! use dbcomm_core::{ConnectionEstablisher, ConnectionSpec};
//!
//! # fn main() -> dbcomm_core::DbCommResult<()> {
//! let spec = ConnectionSpec::new("db.example.com").with_ldap().with_username("jdoe");
//! let handle = ConnectionEstablisher::new().establish(&spec)?;
//! let mut session = handle.open_session()?;
//! handle.select_database(&mut session, "lab")?;
//! for record in handle.list_records(&session, "samples")? {
//!     println!("{record}");
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;


pub use error::{DbCommError, DbCommResult};
pub use models::{
    AuthMode, ConnectionSpec, HostSpec, IntoObjectId, RecordSelector, SecretString, SessionState,
    SshAuth, SshTunnelSpec, TaggedDocument, TlsPolicy, UpdateKind, UpdateOutcome,
};
pub use services::{
    ClientHandle, ConnectionEstablisher, ConnectionPlan, CredentialProvider, DocumentStore,
    InMemoryStore, InteractiveCredentialProvider, KeyringCredentialProvider, SshTunnelHandle,
    StaticCredentialProvider,
};
