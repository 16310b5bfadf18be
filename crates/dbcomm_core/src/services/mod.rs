//! Service layer for dbcomm.
//!
//! - `connection` - Connection planning, `ConnectionEstablisher` and `ClientHandle`
//! - `session` - Database selection, CRUD and blob operations on a `ClientHandle`
//! - `store` - `DocumentStore` and `Connector` traits
//! - `mongo` - MongoDB driver implementation
//! - `memory` - In-process implementation
//! - `credentials` - Secret providers (prompt, static, OS keychain)
//! - `ssh_tunnel` - SSH local port forwarding with russh
//! - `uri` - Connection string construction and redaction

pub mod connection;
pub mod credentials;
pub mod memory;
pub mod mongo;
pub mod session;
pub mod ssh_tunnel;
pub mod store;
pub mod uri;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{plan, ClientHandle, ConnectionEstablisher, ConnectionPlan};
pub use credentials::{
    CredentialProvider, InteractiveCredentialProvider, KeyringCredentialProvider, SecretKind,
    SecretRequest, StaticCredentialProvider,
};
pub use memory::{InMemoryConnector, InMemoryStore};
pub use mongo::{MongoConnector, MongoStore};
pub use ssh_tunnel::{SshTunnelHandle, SshTunnelService, TunnelAuth, TunnelProvider, TunnelRequest};
pub use store::{Connector, DocumentStore};
pub use uri::ConnectionUri;
