//! In-process document store.
//!
//! Keeps databases, collections and blobs in memory. Filters support
//! top-level equality only; updates support `$set` and `$push`. Collections
//! keep creation order so multi-collection scans are deterministic.

use crate::error::{DbCommError, DbCommResult};
use crate::models::UpdateOutcome;
use crate::services::store::{Connector, DocumentStore};
use crate::services::uri::ConnectionUri;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryDatabase {
    /// Collections in creation order.
    collections: Vec<(String, Vec<Document>)>,
    blobs: HashMap<ObjectId, StoredBlob>,
}

impl MemoryDatabase {
    fn collection(&self, name: &str) -> Option<&Vec<Document>> {
        self.collections.iter().find(|(n, _)| n == name).map(|(_, docs)| docs)
    }

    fn existing_collection_mut(&mut self, name: &str) -> Option<&mut Vec<Document>> {
        self.collections.iter_mut().find(|(n, _)| n == name).map(|(_, docs)| docs)
    }

    /// Inserts create collections on demand, as the server does.
    fn collection_mut(&mut self, name: &str) -> &mut Vec<Document> {
        if let Some(index) = self.collections.iter().position(|(n, _)| n == name) {
            return &mut self.collections[index].1;
        }
        self.collections.push((name.to_string(), Vec::new()));
        let last = self.collections.len() - 1;
        &mut self.collections[last].1
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    filename: String,
    data: Vec<u8>,
    metadata: Option<Document>,
}

/// A document store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    databases: RwLock<BTreeMap<String, MemoryDatabase>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an (empty) collection, creating the database if needed.
    pub fn create_collection(&self, database: &str, collection: &str) {
        self.databases.write().entry(database.to_string()).or_default().collection_mut(collection);
    }

    /// Insert documents directly, bypassing the session layer.
    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut databases = self.databases.write();
        let docs = databases.entry(database.to_string()).or_default().collection_mut(collection);
        docs.extend(documents.into_iter().map(with_id));
    }

    /// Number of documents in a collection (0 when absent).
    pub fn count(&self, database: &str, collection: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.collection(collection))
            .map_or(0, Vec::len)
    }

    /// Filename and metadata of a stored blob.
    pub fn file_info(&self, database: &str, id: ObjectId) -> Option<(String, Option<Document>)> {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.blobs.get(&id))
            .map(|blob| (blob.filename.clone(), blob.metadata.clone()))
    }
}

/// Give a document an `_id` in first position when it has none.
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut stamped = Document::new();
    stamped.insert("_id", ObjectId::new());
    stamped.extend(document);
    stamped
}

/// Top-level equality match.
fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| document.get(key) == Some(expected))
}

fn apply_update(document: &mut Document, update: &Document) -> DbCommResult<bool> {
    let before = document.clone();
    for (operator, values) in update {
        let Bson::Document(values) = values else {
            return Err(DbCommError::invalid_argument(format!(
                "Update operator {operator} requires a document"
            )));
        };
        match operator.as_str() {
            "$set" => {
                for (key, value) in values {
                    document.insert(key.clone(), value.clone());
                }
            }
            "$push" => {
                for (key, value) in values {
                    match document.get_mut(key) {
                        Some(Bson::Array(items)) => items.push(value.clone()),
                        Some(_) => {
                            return Err(DbCommError::invalid_argument(format!(
                                "Cannot $push to non-array field '{key}'"
                            )))
                        }
                        None => {
                            document.insert(key.clone(), Bson::Array(vec![value.clone()]));
                        }
                    }
                }
            }
            other => {
                return Err(DbCommError::invalid_argument(format!(
                    "Unsupported update operator '{other}'"
                )))
            }
        }
    }
    Ok(*document != before)
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn list_database_names(&self) -> DbCommResult<Vec<String>> {
        Ok(self.databases.read().keys().cloned().collect())
    }

    async fn list_collection_names(&self, database: &str) -> DbCommResult<Vec<String>> {
        Ok(self
            .databases
            .read()
            .get(database)
            .map(|db| db.collections.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Option<Document>> {
        Ok(self
            .databases
            .read()
            .get(database)
            .and_then(|db| db.collection(collection))
            .and_then(|docs| docs.iter().find(|doc| matches(doc, &filter)).cloned()))
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<Vec<Document>> {
        Ok(self
            .databases
            .read()
            .get(database)
            .and_then(|db| db.collection(collection))
            .map(|docs| docs.iter().filter(|doc| matches(doc, &filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DbCommResult<Bson> {
        let document = with_id(document);
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .collection_mut(collection)
            .push(document);
        Ok(id)
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbCommResult<UpdateOutcome> {
        let mut databases = self.databases.write();
        let Some(docs) =
            databases.get_mut(database).and_then(|db| db.existing_collection_mut(collection))
        else {
            return Ok(UpdateOutcome::default());
        };
        match docs.iter_mut().find(|doc| matches(doc, &filter)) {
            Some(doc) => {
                let changed = apply_update(doc, &update)?;
                Ok(UpdateOutcome { matched: 1, modified: u64::from(changed) })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbCommResult<u64> {
        let mut databases = self.databases.write();
        let Some(docs) =
            databases.get_mut(database).and_then(|db| db.existing_collection_mut(collection))
        else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !matches(doc, &filter));
        Ok((before - docs.len()) as u64)
    }

    async fn drop_collection(&self, database: &str, collection: &str) -> DbCommResult<()> {
        if let Some(db) = self.databases.write().get_mut(database) {
            db.collections.retain(|(name, _)| name != collection);
        }
        Ok(())
    }

    async fn put_file(
        &self,
        database: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId> {
        let id = ObjectId::new();
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .blobs
            .insert(id, StoredBlob { filename: filename.to_string(), data, metadata });
        Ok(id)
    }

    async fn get_file(&self, database: &str, id: ObjectId) -> DbCommResult<Vec<u8>> {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.blobs.get(&id))
            .map(|blob| blob.data.clone())
            .ok_or_else(|| DbCommError::not_found(format!("File {id} does not exist")))
    }

    async fn delete_file(&self, database: &str, id: ObjectId) -> DbCommResult<()> {
        self.databases
            .write()
            .get_mut(database)
            .and_then(|db| db.blobs.remove(&id))
            .map(|_| ())
            .ok_or_else(|| DbCommError::not_found(format!("File {id} does not exist")))
    }

    fn name(&self) -> &'static str {
        "InMemoryStore"
    }
}

/// Connector that hands out one shared in-memory store for any URI.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryStore>,
}

impl InMemoryConnector {
    /// Share `store` with every connection.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        uri: &ConnectionUri,
        _timeout: Duration,
    ) -> DbCommResult<Arc<dyn DocumentStore>> {
        tracing::debug!(uri = %uri, "Connecting to in-memory store");
        Ok(self.store.clone())
    }
}
