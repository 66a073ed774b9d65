//! Carenet Persistence Layer
//!
//! This crate provides the storage abstractions used by the carenet hospital
//! records API. Domain entities (users, hospitals, departments, sharing
//! agreements, clinical artifacts, test orders) are persisted as JSON
//! documents in named collections, with indexed lookups and optimistic
//! concurrency on every write.
//!
//! # Features
//!
//! - **Document storage**: JSON documents grouped by collection
//! - **Optimistic locking**: every update is a compare-and-swap on the stored version
//! - **Unique keys**: compound uniqueness (e.g. hospital + department code) enforced atomically
//! - **Indexed lookups**: equality, membership and substring filters over document fields
//! - **Blob storage**: opaque file storage with signed, expiring download URLs
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`types`] - Stored documents and query types
//! - [`error`] - Error types for all operations
//! - [`core`] - Storage traits
//! - [`backends`] - Backend implementations
//! - [`blob`] - Blob store trait and `object_store` implementation
//!
//! # Quick Start
//!
//! ```no_run
//! use carenet_persistence::core::DocumentStore;
//! use carenet_persistence::backends::sqlite::SqliteBackend;
//! use carenet_persistence::types::{DocumentQuery, UniqueKey};
//! use serde_json::json;
//!
//! # async fn example() -> carenet_persistence::StorageResult<()> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! let stored = backend
//!     .create(
//!         "users",
//!         "user-1",
//!         json!({"email": "ada@example.org", "role": "doctor"}),
//!         vec![UniqueKey::new("users.email", "ada@example.org")],
//!     )
//!     .await?;
//! assert_eq!(stored.version(), 1);
//!
//! let doctors = backend
//!     .find(&DocumentQuery::new("users").with_eq("role", "doctor"))
//!     .await?;
//! assert_eq!(doctors.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod blob;
pub mod core;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{StorageError, StorageResult};
pub use types::{DocumentQuery, StoredDocument, UniqueKey};

// Re-export core traits
pub use core::DocumentStore;
pub use blob::{BlobMetadata, BlobStore, ObjectBlobStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
