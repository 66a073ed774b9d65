//! Core document storage trait.
//!
//! This module defines the [`DocumentStore`] trait, which provides the
//! fundamental CRUD operations for domain documents.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ResourceError, StorageError, StorageResult};
use crate::types::{DocumentQuery, StoredDocument, UniqueKey};

/// Core storage trait for JSON documents.
///
/// # Versioning
///
/// Every document carries a version that starts at 1 and increases by one
/// on each write. [`update`](DocumentStore::update) is a compare-and-swap:
/// it only succeeds when the stored version still equals the version of the
/// `current` document the caller read, so two writers racing from the same
/// snapshot cannot both win. The loser receives
/// `StorageError::Concurrency(VersionConflict)` and must re-read.
///
/// # Unique Keys
///
/// [`create`](DocumentStore::create) reserves each [`UniqueKey`] in the same
/// write as the document. If any key is already held, nothing is written and
/// `StorageError::Resource(Duplicate)` is returned.
///
/// # Example
///
/// ```ignore
/// use carenet_persistence::core::DocumentStore;
///
/// async fn example<S: DocumentStore>(storage: &S) -> Result<(), StorageError> {
///     let stored = storage
///         .create("test_orders", "o-1", json!({"status": "ready_for_test"}), vec![])
///         .await?;
///
///     let mut next = stored.content().clone();
///     next["status"] = json!("in_progress");
///     let updated = storage.update(&stored, next).await?;
///     assert_eq!(updated.version(), 2);
///
///     // A second writer still holding version 1 loses.
///     assert!(storage.update(&stored, json!({})).await.is_err());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Creates a new document.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(AlreadyExists)` - If the ID is taken in the collection
    /// * `StorageError::Resource(Duplicate)` - If any unique key is already held
    async fn create(
        &self,
        collection: &str,
        id: &str,
        content: Value,
        unique_keys: Vec<UniqueKey>,
    ) -> StorageResult<StoredDocument>;

    /// Reads a document by collection and ID.
    async fn read(&self, collection: &str, id: &str) -> StorageResult<Option<StoredDocument>>;

    /// Replaces the content of a document if its stored version still matches
    /// `current.version()`.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If the document doesn't exist
    /// * `StorageError::Concurrency(VersionConflict)` - If the document was modified
    async fn update(&self, current: &StoredDocument, content: Value)
    -> StorageResult<StoredDocument>;

    /// Writes a document without a version check, creating it if missing.
    ///
    /// Intended for best-effort bookkeeping (activity timestamps) that must not
    /// contend with guarded writes on the entities themselves.
    async fn upsert(&self, collection: &str, id: &str, content: Value)
    -> StorageResult<StoredDocument>;

    /// Removes a document and releases its unique keys.
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()>;

    /// Returns all documents matching the query.
    async fn find(&self, query: &DocumentQuery) -> StorageResult<Vec<StoredDocument>>;

    /// Counts documents matching the query (pagination is ignored).
    async fn count(&self, query: &DocumentQuery) -> StorageResult<u64>;

    /// Reads a document that must exist.
    async fn read_required(&self, collection: &str, id: &str) -> StorageResult<StoredDocument> {
        self.read(collection, id).await?.ok_or_else(|| {
            StorageError::Resource(ResourceError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
        })
    }

    /// Returns the first document matching the query, if any.
    async fn find_one(&self, query: &DocumentQuery) -> StorageResult<Option<StoredDocument>> {
        Ok(self.find(query).await?.into_iter().next())
    }
}
