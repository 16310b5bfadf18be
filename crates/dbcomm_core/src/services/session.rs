//! Session operations on a connected handle.
//!
//! Every operation takes the caller's `SessionState`. Collection-scoped calls
//! check the cached listing first and fail with `NotFound` without touching
//! the store when the collection is not there.

use crate::error::{DbCommError, DbCommResult};
use crate::models::record::{CREATE_TIME_FIELD, PROFILE_COLLECTION, USER_NAME_FIELD};
use crate::models::{
    IntoObjectId, RecordSelector, SessionState, TaggedDocument, UpdateKind, UpdateOutcome,
};
use crate::services::connection::ClientHandle;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::Utc;
use std::path::Path;

fn selected_database(state: &SessionState) -> DbCommResult<&str> {
    state.database().ok_or_else(|| DbCommError::not_found("No database selected"))
}

/// Resolve the database for a collection-scoped call.
fn collection_scope<'a>(state: &'a SessionState, collection: &str) -> DbCommResult<&'a str> {
    let database = selected_database(state)?;
    if !state.has_collection(collection) {
        return Err(DbCommError::not_found(format!(
            "Collection '{collection}' does not exist in database '{database}'"
        )));
    }
    Ok(database)
}

impl ClientHandle {
    /// Start a session: databases listed, nothing selected.
    pub fn open_session(&self) -> DbCommResult<SessionState> {
        let mut state = SessionState::new();
        self.refresh_databases(&mut state)?;
        Ok(state)
    }

    /// Re-read the database list into `state`.
    pub fn refresh_databases<'a>(&self, state: &'a mut SessionState) -> DbCommResult<&'a [String]> {
        state.databases = self.list_database_names()?;
        tracing::debug!(connection_id = %self.id(), count = state.databases.len(), "Databases refreshed");
        Ok(state.databases.as_slice())
    }

    /// Select a database from the cached list and load its collections.
    pub fn select_database(&self, state: &mut SessionState, name: &str) -> DbCommResult<()> {
        if !state.has_database(name) {
            return Err(DbCommError::not_found(format!("Database '{name}' does not exist")));
        }
        let collections = self.block_on(self.store().list_collection_names(name))?;
        state.current_database = Some(name.to_string());
        state.collections = collections;
        tracing::debug!(
            connection_id = %self.id(),
            database = name,
            collections = state.collections.len(),
            "Database selected"
        );
        Ok(())
    }

    /// Re-read the collection list of the selected database.
    pub fn refresh_collections<'a>(
        &self,
        state: &'a mut SessionState,
    ) -> DbCommResult<&'a [String]> {
        let database = selected_database(state)?.to_string();
        state.collections = self.block_on(self.store().list_collection_names(&database))?;
        Ok(state.collections.as_slice())
    }

    /// Probe every cached collection for `_id == id`.
    ///
    /// When several collections hold the id, the last one in listing order wins.
    pub fn find_by_id_across_collections(
        &self,
        state: &SessionState,
        id: impl IntoObjectId,
    ) -> DbCommResult<Option<TaggedDocument>> {
        let database = selected_database(state)?;
        let filter = RecordSelector::id(id)?.to_filter();

        let mut found = None;
        for collection in &state.collections {
            let hit = self.block_on(self.store().find_one(database, collection, filter.clone()))?;
            if let Some(document) = hit {
                found = Some(TaggedDocument { collection: collection.clone(), document });
            }
        }
        Ok(found)
    }

    /// Every document matching `filter`, across the cached collections of the
    /// selected database except the profiler's.
    pub fn find_by_field_across_collections(
        &self,
        state: &SessionState,
        filter: &Bson,
    ) -> DbCommResult<Vec<TaggedDocument>> {
        let Bson::Document(filter) = filter else {
            return Err(DbCommError::invalid_argument(format!(
                "Field filter must be a document, got {:?}",
                filter.element_type()
            )));
        };
        let database = selected_database(state)?;

        let mut matches = Vec::new();
        for collection in state.collections.iter().filter(|c| c.as_str() != PROFILE_COLLECTION) {
            let documents = self.block_on(self.store().find(database, collection, filter.clone()))?;
            matches.extend(
                documents
                    .into_iter()
                    .map(|document| TaggedDocument { collection: collection.clone(), document }),
            );
        }
        Ok(matches)
    }

    /// First record matching `selector`.
    pub fn get_record(
        &self,
        state: &SessionState,
        collection: &str,
        selector: RecordSelector,
    ) -> DbCommResult<Option<Document>> {
        let database = collection_scope(state, collection)?;
        self.block_on(self.store().find_one(database, collection, selector.to_filter()))
    }

    /// Every record in a collection.
    pub fn list_records(&self, state: &SessionState, collection: &str) -> DbCommResult<Vec<Document>> {
        let database = collection_scope(state, collection)?;
        self.block_on(self.store().find(database, collection, Document::new()))
    }

    /// Insert a record stamped with `userName` and `CreateTime`.
    ///
    /// Caller fields are applied after the stamps, so a caller may override
    /// either. Returns the inserted `_id`.
    pub fn insert_record(
        &self,
        state: &SessionState,
        collection: &str,
        fields: Document,
    ) -> DbCommResult<Bson> {
        let database = collection_scope(state, collection)?;

        let mut record = Document::new();
        record.insert(USER_NAME_FIELD, self.username());
        record.insert(CREATE_TIME_FIELD, bson::DateTime::from_chrono(Utc::now()));
        for (key, value) in fields {
            record.insert(key, value);
        }

        let id = self.block_on(self.store().insert_one(database, collection, record))?;
        tracing::debug!(connection_id = %self.id(), database, collection, id = %id, "Record inserted");
        Ok(id)
    }

    /// Apply `values` to the first record matching `selector`.
    pub fn update_record(
        &self,
        state: &SessionState,
        collection: &str,
        selector: RecordSelector,
        values: Document,
        kind: UpdateKind,
    ) -> DbCommResult<UpdateOutcome> {
        let database = collection_scope(state, collection)?;
        let outcome = self.block_on(self.store().update_one(
            database,
            collection,
            selector.to_filter(),
            kind.to_update(values),
        ))?;
        tracing::debug!(
            connection_id = %self.id(),
            database,
            collection,
            operator = kind.operator(),
            matched = outcome.matched,
            modified = outcome.modified,
            "Record updated"
        );
        Ok(outcome)
    }

    /// Delete matching records; `None` deletes every record.
    pub fn delete_records(
        &self,
        state: &SessionState,
        collection: &str,
        selector: Option<RecordSelector>,
    ) -> DbCommResult<u64> {
        let database = collection_scope(state, collection)?;
        let filter = selector.map(|s| s.to_filter()).unwrap_or_default();
        let deleted = self.block_on(self.store().delete_many(database, collection, filter))?;
        tracing::debug!(connection_id = %self.id(), database, collection, deleted, "Records deleted");
        Ok(deleted)
    }

    /// Drop a collection and remove it from the cached listing.
    pub fn drop_collection(&self, state: &mut SessionState, collection: &str) -> DbCommResult<()> {
        let database = collection_scope(state, collection)?.to_string();
        self.block_on(self.store().drop_collection(&database, collection))?;
        state.collections.retain(|c| c != collection);
        tracing::info!(connection_id = %self.id(), database = %database, collection, "Collection dropped");
        Ok(())
    }

    /// Store a blob in the selected database.
    pub fn put_file(
        &self,
        state: &SessionState,
        filename: &str,
        data: Vec<u8>,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId> {
        let database = selected_database(state)?;
        self.block_on(self.store().put_file(database, filename, data, metadata))
    }

    /// Store a local file as a blob named after the file.
    pub fn put_file_from_path(
        &self,
        state: &SessionState,
        path: &Path,
        metadata: Option<Document>,
    ) -> DbCommResult<ObjectId> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                DbCommError::invalid_argument(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let data = std::fs::read(path)?;
        self.put_file(state, &filename, data, metadata)
    }

    /// Read a blob back.
    pub fn get_file(&self, state: &SessionState, id: impl IntoObjectId) -> DbCommResult<Vec<u8>> {
        let database = selected_database(state)?;
        let id = id.into_object_id()?;
        self.block_on(self.store().get_file(database, id))
    }

    /// Remove a blob.
    pub fn delete_file(&self, state: &SessionState, id: impl IntoObjectId) -> DbCommResult<()> {
        let database = selected_database(state)?;
        let id = id.into_object_id()?;
        self.block_on(self.store().delete_file(database, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryStore;
    use bson::doc;
    use std::sync::Arc;

    fn connected() -> (Arc<InMemoryStore>, ClientHandle, SessionState) {
        let store = Arc::new(InMemoryStore::new());
        store.seed("lab", "samples", vec![doc! { "name": "s1", "tags": ["raw"] }]);
        store.create_collection("lab", "runs");
        store.create_collection("archive", "old");
        let handle = ClientHandle::from_store(store.clone(), "jdoe").unwrap();
        let mut state = handle.open_session().unwrap();
        handle.select_database(&mut state, "lab").unwrap();
        (store, handle, state)
    }

    #[test]
    fn test_open_session_selects_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store.create_collection("lab", "runs");
        let handle = ClientHandle::from_store(store, "jdoe").unwrap();
        let state = handle.open_session().unwrap();
        assert_eq!(state.databases, vec!["lab"]);
        assert!(state.current_database.is_none());
        assert!(state.collections.is_empty());
    }

    #[test]
    fn test_select_unknown_database_keeps_state() {
        let (_, handle, mut state) = connected();
        let before = state.clone();
        let err = handle.select_database(&mut state, "missing").unwrap_err();
        assert!(matches!(err, DbCommError::NotFound { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_select_database_recomputes_collections() {
        let (_, handle, mut state) = connected();
        assert_eq!(state.collections, vec!["samples", "runs"]);
        handle.select_database(&mut state, "archive").unwrap();
        assert_eq!(state.collections, vec!["old"]);
    }

    #[test]
    fn test_insert_stamps_user_and_time() {
        let (store, handle, state) = connected();
        let id = handle.insert_record(&state, "runs", doc! { "value": 42 }).unwrap();

        let record = handle
            .get_record(&state, "runs", RecordSelector::id(id).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.get_str(USER_NAME_FIELD).unwrap(), "jdoe");
        assert!(record.get_datetime(CREATE_TIME_FIELD).is_ok());
        assert_eq!(record.get_i32("value").unwrap(), 42);
        assert_eq!(store.count("lab", "runs"), 1);
    }

    #[test]
    fn test_insert_caller_fields_override_stamps() {
        let (_, handle, state) = connected();
        let id = handle
            .insert_record(&state, "runs", doc! { "userName": "importer" })
            .unwrap();
        let record = handle
            .get_record(&state, "runs", RecordSelector::id(id).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.get_str(USER_NAME_FIELD).unwrap(), "importer");
    }

    #[test]
    fn test_unknown_collection_is_not_found() {
        let (store, handle, state) = connected();
        let err = handle.insert_record(&state, "nope", doc! {}).unwrap_err();
        assert!(matches!(err, DbCommError::NotFound { .. }));
        assert_eq!(store.count("lab", "nope"), 0);
    }

    #[test]
    fn test_update_push_and_set() {
        let (_, handle, state) = connected();
        let selector = RecordSelector::Filter(doc! { "name": "s1" });
        let outcome = handle
            .update_record(&state, "samples", selector.clone(), doc! { "tags": "qc" }, UpdateKind::Push)
            .unwrap();
        assert_eq!(outcome.matched, 1);
        handle
            .update_record(&state, "samples", selector.clone(), doc! { "status": "ok" }, UpdateKind::Set)
            .unwrap();

        let record = handle.get_record(&state, "samples", selector).unwrap().unwrap();
        assert_eq!(record.get_array("tags").unwrap().len(), 2);
        assert_eq!(record.get_str("status").unwrap(), "ok");
    }

    #[test]
    fn test_delete_without_selector_empties_collection() {
        let (store, handle, state) = connected();
        handle.insert_record(&state, "runs", doc! { "n": 1 }).unwrap();
        handle.insert_record(&state, "runs", doc! { "n": 2 }).unwrap();
        assert_eq!(handle.delete_records(&state, "runs", None).unwrap(), 2);
        assert_eq!(store.count("lab", "runs"), 0);
    }

    #[test]
    fn test_drop_collection_updates_cache() {
        let (_, handle, mut state) = connected();
        handle.drop_collection(&mut state, "runs").unwrap();
        assert_eq!(state.collections, vec!["samples"]);
        assert!(handle.list_records(&state, "runs").is_err());
    }

    #[test]
    fn test_find_by_field_rejects_non_document() {
        let (_, handle, state) = connected();
        let err = handle
            .find_by_field_across_collections(&state, &Bson::String("name".into()))
            .unwrap_err();
        assert!(matches!(err, DbCommError::InvalidArgument { .. }));
    }

    #[test]
    fn test_put_file_from_path() {
        let (store, handle, state) = connected();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let id = handle.put_file_from_path(&state, &path, Some(doc! { "kind": "csv" })).unwrap();
        assert_eq!(handle.get_file(&state, id.to_hex()).unwrap(), b"a,b\n1,2\n");
        let (filename, metadata) = store.file_info("lab", id).unwrap();
        assert_eq!(filename, "plate.csv");
        assert_eq!(metadata, Some(doc! { "kind": "csv" }));

        handle.delete_file(&state, id).unwrap();
        assert!(handle.get_file(&state, id).is_err());
    }

    #[test]
    fn test_file_ops_reject_malformed_id() {
        let (_, handle, state) = connected();
        let err = handle.get_file(&state, "not-hex").unwrap_err();
        assert!(matches!(err, DbCommError::InvalidArgument { .. }));
    }
}
