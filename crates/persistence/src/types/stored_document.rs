//! Stored document types.
//!
//! This module defines the [`StoredDocument`] type, which wraps a JSON
//! document with persistence metadata such as collection, version and
//! timestamps.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, StorageError, StorageResult};

/// A JSON document with persistence metadata.
///
/// `StoredDocument` wraps the document content along with the metadata
/// required for persistence operations:
///
/// - **Identity**: Collection and ID
/// - **Versioning**: Version number for optimistic locking
/// - **Timestamps**: Creation and modification times
///
/// # Examples
///
/// ```
/// use carenet_persistence::types::StoredDocument;
/// use serde_json::json;
///
/// let doc = StoredDocument::new("test_orders", "o-1", json!({"status": "ready_for_test"}));
///
/// assert_eq!(doc.collection(), "test_orders");
/// assert_eq!(doc.id(), "o-1");
/// assert_eq!(doc.version(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    /// The collection this document belongs to (e.g. "users").
    collection: String,

    /// The document's ID, unique within its collection.
    id: String,

    /// The version (monotonically increasing, starts at 1).
    version: u64,

    /// The document content as JSON.
    content: Value,

    /// When the document was first created.
    created_at: DateTime<Utc>,

    /// When the document was last modified.
    last_modified: DateTime<Utc>,
}

impl StoredDocument {
    /// Creates a new stored document at version 1.
    pub fn new(collection: impl Into<String>, id: impl Into<String>, content: Value) -> Self {
        let now = Utc::now();
        Self {
            collection: collection.into(),
            id: id.into(),
            version: 1,
            content,
            created_at: now,
            last_modified: now,
        }
    }

    /// Creates a stored document from existing data (e.g., loaded from database).
    pub fn from_storage(
        collection: impl Into<String>,
        id: impl Into<String>,
        version: u64,
        content: Value,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            version,
            content,
            created_at,
            last_modified,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the document ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the document content as JSON.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes self and returns the content.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns when the document was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the document was last modified.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Returns the path of this document (e.g., "users/123").
    pub fn url(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Deserializes the content into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(self.content.clone()).map_err(|e| {
            StorageError::Backend(BackendError::SerializationError {
                message: format!("Failed to decode {}: {}", self.url(), e),
            })
        })
    }

    /// Creates the next version of this document with updated content.
    pub fn new_version(self, content: Value) -> Self {
        Self {
            collection: self.collection,
            id: self.id,
            version: self.version + 1,
            content,
            created_at: self.created_at,
            last_modified: Utc::now(),
        }
    }
}

/// A key that must be unique across all documents of a namespace.
///
/// Unique keys are reserved in the same write as the document they belong
/// to, so two concurrent inserts with the same key cannot both succeed.
///
/// ```
/// use carenet_persistence::types::UniqueKey;
///
/// let key = UniqueKey::compound("departments.code", &["h-1", "CARD"]);
/// assert_eq!(key.value(), "h-1:CARD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKey {
    namespace: String,
    value: String,
}

impl UniqueKey {
    /// Creates a single-field unique key.
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    /// Creates a compound key whose parts are joined with `:`.
    pub fn compound(namespace: impl Into<String>, parts: &[&str]) -> Self {
        Self {
            namespace: namespace.into(),
            value: parts.join(":"),
        }
    }

    /// Returns the namespace (usually `collection.field`).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the key value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.namespace, self.value)
    }
}
