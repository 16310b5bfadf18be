//! Record selectors, update kinds and tagged results.

use crate::error::{DbCommError, DbCommResult};

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

/// Field stamped with the acting username on insert.
pub const USER_NAME_FIELD: &str = "userName";

/// Field stamped with the creation time on insert.
pub const CREATE_TIME_FIELD: &str = "CreateTime";

/// Internal profiling collection skipped by field scans.
pub const PROFILE_COLLECTION: &str = "system.profile";

/// Normalization of caller identifiers to the store's `ObjectId`.
pub trait IntoObjectId {
    /// Convert to an `ObjectId`, rejecting malformed input.
    fn into_object_id(self) -> DbCommResult<ObjectId>;
}

impl IntoObjectId for ObjectId {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        Ok(self)
    }
}

impl IntoObjectId for &ObjectId {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        Ok(*self)
    }
}

impl IntoObjectId for &str {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        Ok(ObjectId::parse_str(self.trim())?)
    }
}

impl IntoObjectId for String {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        self.as_str().into_object_id()
    }
}

impl IntoObjectId for &String {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        self.as_str().into_object_id()
    }
}

impl IntoObjectId for Bson {
    fn into_object_id(self) -> DbCommResult<ObjectId> {
        match self {
            Bson::ObjectId(oid) => Ok(oid),
            Bson::String(s) => s.into_object_id(),
            other => Err(DbCommError::invalid_argument(format!(
                "Expected an ObjectId or hex string, got {:?}",
                other.element_type()
            ))),
        }
    }
}

/// Identifies one record: by `_id`, or by an arbitrary filter document.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSelector {
    /// Match `{ _id: <id> }`.
    Id(ObjectId),
    /// Match an arbitrary filter.
    Filter(Document),
}

impl RecordSelector {
    /// Select by identifier, normalizing strings to `ObjectId`.
    pub fn id(id: impl IntoObjectId) -> DbCommResult<Self> {
        Ok(Self::Id(id.into_object_id()?))
    }

    /// Build from a loosely typed value: an id, a hex string or a document.
    pub fn from_bson(value: Bson) -> DbCommResult<Self> {
        match value {
            Bson::Document(filter) => Ok(Self::Filter(filter)),
            Bson::ObjectId(oid) => Ok(Self::Id(oid)),
            Bson::String(s) => Self::id(s),
            other => Err(DbCommError::invalid_argument(format!(
                "Invalid field. Must be either an ObjectId or a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// The filter document sent to the store.
    pub fn to_filter(&self) -> Document {
        match self {
            Self::Id(oid) => doc! { "_id": *oid },
            Self::Filter(filter) => filter.clone(),
        }
    }
}

impl From<ObjectId> for RecordSelector {
    fn from(oid: ObjectId) -> Self {
        Self::Id(oid)
    }
}

impl From<Document> for RecordSelector {
    fn from(filter: Document) -> Self {
        Self::Filter(filter)
    }
}

impl TryFrom<&str> for RecordSelector {
    type Error = DbCommError;

    fn try_from(id: &str) -> DbCommResult<Self> {
        Self::id(id)
    }
}

/// How an update applies its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Overwrite the field values (`$set`).
    #[default]
    Set,
    /// Append to array fields (`$push`).
    Push,
}

impl UpdateKind {
    /// The update operator.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::Push => "$push",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> DbCommResult<Self> {
        match s.to_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "push" => Ok(Self::Push),
            other => Err(DbCommError::invalid_argument(format!(
                "Unknown update type '{other}', expected 'set' or 'push'"
            ))),
        }
    }

    /// Wrap `values` in this kind's operator.
    pub fn to_update(&self, values: Document) -> Document {
        let mut update = Document::new();
        update.insert(self.operator(), values);
        update
    }
}

/// A document tagged with the collection it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedDocument {
    /// Owning collection
    pub collection: String,
    /// The matched document
    pub document: Document,
}

/// Result counts of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Documents actually changed
    pub modified: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "64b7f0c2a1b2c3d4e5f60718";

    #[test]
    fn test_string_ids_normalize_to_object_id() {
        let selector = RecordSelector::id(HEX).unwrap();
        let oid = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(selector, RecordSelector::Id(oid));
        assert_eq!(selector.to_filter(), doc! { "_id": oid });
    }

    #[test]
    fn test_malformed_id_is_invalid_argument() {
        let err = RecordSelector::id("xyz").unwrap_err();
        assert!(matches!(err, DbCommError::InvalidArgument { .. }));
    }

    #[test]
    fn test_from_bson_rejects_scalars() {
        assert!(RecordSelector::from_bson(Bson::Int32(4)).is_err());
        let filter = RecordSelector::from_bson(Bson::Document(doc! { "kind": "probe" })).unwrap();
        assert_eq!(filter.to_filter(), doc! { "kind": "probe" });
    }

    #[test]
    fn test_update_kind() {
        assert_eq!(UpdateKind::parse("PUSH").unwrap(), UpdateKind::Push);
        assert!(UpdateKind::parse("unset").is_err());
        assert_eq!(
            UpdateKind::Set.to_update(doc! { "status": "done" }),
            doc! { "$set": { "status": "done" } }
        );
    }
}
