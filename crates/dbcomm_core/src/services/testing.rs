//! Test doubles for the establisher's collaborators.

use crate::error::DbCommResult;
use crate::models::{SecretString, UpdateOutcome};
use crate::services::credentials::{CredentialProvider, SecretRequest};
use crate::services::memory::InMemoryStore;
use crate::services::ssh_tunnel::{SshTunnelHandle, TunnelProvider, TunnelRequest};
use crate::services::store::{Connector, DocumentStore};
use crate::services::uri::ConnectionUri;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records every URI and answers with scripted outcomes, then successes.
#[derive(Default)]
pub struct ScriptedConnector {
    store: Arc<InMemoryStore>,
    outcomes: Mutex<VecDeque<DbCommResult<()>>>,
    uris: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn with_outcomes(outcomes: Vec<DbCommResult<()>>) -> Self {
        Self { outcomes: Mutex::new(outcomes.into()), ..Self::default() }
    }

    pub fn with_store(store: Arc<InMemoryStore>) -> Self {
        Self { store, ..Self::default() }
    }

    /// Unredacted URIs in call order.
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        uri: &ConnectionUri,
        _timeout: Duration,
    ) -> DbCommResult<Arc<dyn DocumentStore>> {
        self.uris.lock().push(uri.as_str().to_string());
        match self.outcomes.lock().pop_front() {
            Some(Err(e)) => Err(e),
            Some(Ok(())) | None => Ok(self.store.clone()),
        }
    }
}

/// Hands out tunnels on a fixed port and keeps their cancel tokens.
#[derive(Default)]
pub struct RecordingTunnels {
    requests: Mutex<Vec<TunnelRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl RecordingTunnels {
    pub const LOCAL_PORT: u16 = 45678;

    pub fn last_request(&self) -> Option<TunnelRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn last_token(&self) -> Option<CancellationToken> {
        self.tokens.lock().last().cloned()
    }
}

#[async_trait]
impl TunnelProvider for RecordingTunnels {
    async fn start(&self, request: TunnelRequest) -> DbCommResult<SshTunnelHandle> {
        let token = CancellationToken::new();
        let handle = SshTunnelHandle::new(
            Self::LOCAL_PORT,
            request.remote_host.clone(),
            request.remote_port,
            token.clone(),
        );
        self.requests.lock().push(request);
        self.tokens.lock().push(token);
        Ok(handle)
    }
}

/// Always answers with the same secret and counts the conversation.
pub struct CountingCredentials {
    secret: SecretString,
    asked: AtomicU32,
    accepted: AtomicU32,
    rejected: AtomicU32,
}

impl CountingCredentials {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: SecretString::new(secret),
            asked: AtomicU32::new(0),
            accepted: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
        }
    }

    pub fn asked(&self) -> u32 {
        self.asked.load(Ordering::SeqCst)
    }

    pub fn acceptances(&self) -> u32 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn rejections(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl CredentialProvider for CountingCredentials {
    fn secret(&self, _request: &SecretRequest, _attempt: u32) -> DbCommResult<SecretString> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.secret.clone())
    }

    fn accepted(&self, _request: &SecretRequest, _secret: &SecretString) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn rejected(&self, _request: &SecretRequest) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "CountingCredentials"
    }
}

/// Wraps an `InMemoryStore` and counts every store call.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicU32,
}

impl CountingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self { inner, calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) -> &InMemoryStore {
        self.calls.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn list_database_names(&self) -> DbCommResult<Vec<String>> {
        self.hit().list_database_names().await
    }

    async fn list_collection_names(&self, database: &str) -> DbCommResult<Vec<String>> {
        self.hit().list_collection_names(database).await
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Option<Document>> {
        self.hit().find_one(database, collection, filter).await
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Vec<Document>> {
        self.hit().find(database, collection, filter).await
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DbCommResult<Bson> {
        self.hit().insert_one(database, collection, document).await
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbCommResult<UpdateOutcome> {
        self.hit().update_one(database, collection, filter, update).await
    }

    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<u64> {
        self.hit().delete_many(database, collection, filter).await
    }

    async fn drop_collection(&self, database: &str, collection: &str) -> DbCommResult<()> {
        self.hit().drop_collection(database, collection).await
    }

    async fn put_file(
        &self,
        database: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId> {
        self.hit().put_file(database, filename, data, metadata).await
    }

    async fn get_file(&self, database: &str, id: ObjectId) -> DbCommResult<Vec<u8>> {
        self.hit().get_file(database, id).await
    }

    async fn delete_file(&self, database: &str, id: ObjectId) -> DbCommResult<()> {
        self.hit().delete_file(database, id).await
    }

    fn name(&self) -> &'static str {
        "CountingStore"
    }
}
