//! MongoDB-backed document store.
//!
//! Thin pass-through to the `mongodb` driver:
//! - Collections are untyped (`Document`)
//! - Blobs live in the database's default GridFS bucket
//! - Connecting proves the server with `list_database_names`

use crate::error::{DbCommError, DbCommResult};
use crate::models::UpdateOutcome;
use crate::services::store::{Connector, DocumentStore};
use crate::services::uri::ConnectionUri;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures_util::io::{AsyncReadExt, AsyncWriteExt};
use futures_util::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::sync::Arc;
use std::time::Duration;

/// Application name reported to the server.
const APP_NAME: &str = "dbcomm";

/// Slack added to the driver's own timeout before the outer deadline fires.
const DEADLINE_GRACE: Duration = Duration::from_millis(100);

/// A connected MongoDB client.
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection::<Document>(collection)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn list_database_names(&self) -> DbCommResult<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }

    async fn list_collection_names(&self, database: &str) -> DbCommResult<Vec<String>> {
        Ok(self.client.database(database).list_collection_names().await?)
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Option<Document>> {
        Ok(self.collection(database, collection).find_one(filter).await?)
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Vec<Document>> {
        let cursor = self.collection(database, collection).find(filter).await?;
        Ok(cursor.try_collect::<Vec<Document>>().await?)
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DbCommResult<Bson> {
        let result = self.collection(database, collection).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbCommResult<UpdateOutcome> {
        let result = self.collection(database, collection).update_one(filter, update).await?;
        Ok(UpdateOutcome { matched: result.matched_count, modified: result.modified_count })
    }

    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<u64> {
        let result = self.collection(database, collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn drop_collection(&self, database: &str, collection: &str) -> DbCommResult<()> {
        Ok(self.collection(database, collection).drop().await?)
    }

    async fn put_file(
        &self,
        database: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId> {
        let bucket = self.client.database(database).gridfs_bucket(None);
        let id = ObjectId::new();

        let mut upload = bucket.open_upload_stream(filename).id(Bson::ObjectId(id));
        if let Some(metadata) = metadata {
            upload = upload.metadata(metadata);
        }
        let mut stream = upload.await?;
        stream.write_all(&data).await?;
        stream.close().await?;

        tracing::debug!(database, filename, file_id = %id, bytes = data.len(), "Blob stored");
        Ok(id)
    }

    async fn get_file(&self, database: &str, id: ObjectId) -> DbCommResult<Vec<u8>> {
        let bucket = self.client.database(database).gridfs_bucket(None);
        let mut stream = bucket.open_download_stream(Bson::ObjectId(id)).await?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn delete_file(&self, database: &str, id: ObjectId) -> DbCommResult<()> {
        let bucket = self.client.database(database).gridfs_bucket(None);
        Ok(bucket.delete(Bson::ObjectId(id)).await?)
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }

    fn name(&self) -> &'static str {
        "MongoStore"
    }
}

/// Connector that opens real driver clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

impl MongoConnector {
    /// Create a new connector.
    pub fn new() -> Self {
        Self
    }

    async fn connect_inner(uri: &ConnectionUri, timeout: Duration) -> DbCommResult<MongoStore> {
        let mut options = ClientOptions::parse(uri.as_str()).await?;
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        options.app_name = Some(APP_NAME.to_string());

        let store = MongoStore::new(Client::with_options(options)?);
        store.list_database_names().await?;
        Ok(store)
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        uri: &ConnectionUri,
        timeout: Duration,
    ) -> DbCommResult<Arc<dyn DocumentStore>> {
        let timeout_ms = timeout.as_millis() as u64;
        tracing::debug!(uri = %uri, timeout_ms, "Connecting to document store");

        match tokio::time::timeout(timeout + DEADLINE_GRACE, Self::connect_inner(uri, timeout))
            .await
        {
            Ok(Ok(store)) => Ok(Arc::new(store)),
            Ok(Err(DbCommError::Timeout { message, .. })) => {
                Err(DbCommError::timeout(message, timeout_ms))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DbCommError::timeout(
                format!("No response from {} before the deadline", uri.redacted()),
                timeout_ms,
            )),
        }
    }
}
