//! Document store abstraction.
//!
//! `DocumentStore` is the seam between session operations and the driver.
//! `Connector` turns a connection URI into a live store.

use crate::error::DbCommResult;
use crate::models::UpdateOutcome;
use crate::services::uri::ConnectionUri;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::sync::Arc;
use std::time::Duration;

/// Operations the external document store must provide.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every database on the server.
    async fn list_database_names(&self) -> DbCommResult<Vec<String>>;

    /// Names of every collection in `database`.
    async fn list_collection_names(&self, database: &str) -> DbCommResult<Vec<String>>;

    /// First document matching `filter`.
    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Option<Document>>;

    /// Every document matching `filter`.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Vec<Document>>;

    /// Insert one document, returning its `_id`.
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DbCommResult<Bson>;

    /// Apply `update` (an operator document) to the first match.
    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbCommResult<UpdateOutcome>;

    /// Delete every match, returning the count.
    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<u64>;

    /// Drop a collection.
    async fn drop_collection(&self, database: &str, collection: &str) -> DbCommResult<()>;

    /// Store a blob in the database's large-object storage.
    async fn put_file(
        &self,
        database: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId>;

    /// Read a blob back in full.
    async fn get_file(&self, database: &str, id: ObjectId) -> DbCommResult<Vec<u8>>;

    /// Remove a blob and its chunks.
    async fn delete_file(&self, database: &str, id: ObjectId) -> DbCommResult<()>;

    /// Release driver resources.
    async fn shutdown(&self) {}

    /// Store name for logging.
    fn name(&self) -> &'static str;
}

/// Produces a connected store from a URI.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and prove the connection by listing databases, within `timeout`.
    async fn connect(
        &self,
        uri: &ConnectionUri,
        timeout: Duration,
    ) -> DbCommResult<Arc<dyn DocumentStore>>;
}
