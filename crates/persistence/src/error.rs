//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates document state errors, concurrency
//! errors, backend errors and blob storage errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Document state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency and versioning errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Blob storage errors
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Errors related to document state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested document was not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A document with the given ID already exists.
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// A unique key is already held by another document.
    #[error("duplicate key in {collection}: {key}")]
    Duplicate { collection: String, key: String },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The stored version moved on between read and write.
    #[error("version conflict on {collection}/{id}: expected {expected_version}, found {actual_version}")]
    VersionConflict {
        collection: String,
        id: String,
        expected_version: u64,
        actual_version: u64,
    },
}

/// Errors originating from a storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Could not obtain a connection.
    #[error("connection to {backend_name} failed: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Unclassified backend failure.
    #[error("{backend_name} error: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Document content could not be (de)serialized.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors related to blob storage.
#[derive(Error, Debug)]
pub enum BlobError {
    /// The URL does not belong to this blob store.
    #[error("invalid blob url: {url}")]
    InvalidUrl { url: String },

    /// No blob stored under the key.
    #[error("blob not found: {key}")]
    NotFound { key: String },

    /// Presigned URL signature or expiry check failed.
    #[error("invalid or expired signature for {key}")]
    InvalidSignature { key: String },

    /// Underlying object store failure.
    #[error("object store error: {message}")]
    Store { message: String },
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { key: path },
            other => BlobError::Store {
                message: other.to_string(),
            },
        }
    }
}

impl StorageError {
    /// Returns `true` if this is a version conflict.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::Concurrency(ConcurrencyError::VersionConflict { .. })
        )
    }

    /// Returns `true` if a unique key was already taken.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StorageError::Resource(ResourceError::Duplicate { .. })
                | StorageError::Resource(ResourceError::AlreadyExists { .. })
        )
    }

    /// Returns `true` if the document does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound { .. }))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ResourceError::NotFound {
            collection: "users".to_string(),
            id: "u1".to_string(),
        };
        assert_eq!(err.to_string(), "document not found: users/u1");
    }

    #[test]
    fn test_version_conflict_classification() {
        let err: StorageError = ConcurrencyError::VersionConflict {
            collection: "test_orders".to_string(),
            id: "o1".to_string(),
            expected_version: 2,
            actual_version: 3,
        }
        .into();
        assert!(err.is_version_conflict());
        assert!(!err.is_duplicate());
        assert!(err.to_string().contains("expected 2, found 3"));
    }

    #[test]
    fn test_duplicate_classification() {
        let err: StorageError = ResourceError::Duplicate {
            collection: "departments".to_string(),
            key: "h1:CARD".to_string(),
        }
        .into();
        assert!(err.is_duplicate());
        assert!(!err.is_not_found());
    }
}
