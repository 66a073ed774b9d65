//! Core storage traits and abstractions.
//!
//! This module provides the foundational trait for the persistence layer:
//!
//! - [`DocumentStore`] - CRUD over JSON documents with optimistic locking and
//!   indexed lookups
//!
//! # Example: Implementing a Storage Backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use carenet_persistence::core::DocumentStore;
//! use carenet_persistence::types::{StoredDocument, UniqueKey};
//! use carenet_persistence::error::StorageResult;
//!
//! struct MyBackend {
//!     // ... backend-specific fields
//! }
//!
//! #[async_trait]
//! impl DocumentStore for MyBackend {
//!     fn backend_name(&self) -> &'static str {
//!         "my-backend"
//!     }
//!
//!     async fn create(
//!         &self,
//!         collection: &str,
//!         id: &str,
//!         content: serde_json::Value,
//!         unique_keys: Vec<UniqueKey>,
//!     ) -> StorageResult<StoredDocument> {
//!         // Implementation...
//!         todo!()
//!     }
//!
//!     // ... implement other required methods
//! }
//! ```

pub mod storage;

pub use storage::DocumentStore;
