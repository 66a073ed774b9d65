//! Core types for the persistence layer.
//!
//! This module provides the fundamental types used throughout the persistence layer:
//!
//! - [`StoredDocument`] - A JSON document with persistence metadata
//! - [`UniqueKey`] - A key reserved atomically alongside a document
//! - [`DocumentQuery`], [`Filter`] - Indexed lookups over document fields
//! - [`Pagination`] - Limit/offset pagination
//!
//! # Examples
//!
//! ## Creating a Stored Document
//!
//! ```
//! use carenet_persistence::types::StoredDocument;
//! use serde_json::json;
//!
//! let doc = StoredDocument::new("hospitals", "h-1", json!({"name": "St. Mary"}));
//!
//! assert_eq!(doc.url(), "hospitals/h-1");
//! assert_eq!(doc.version(), 1);
//! ```
//!
//! ## Building a Query
//!
//! ```
//! use carenet_persistence::types::{DocumentQuery, Pagination};
//!
//! let query = DocumentQuery::new("users")
//!     .with_eq("role", "patient")
//!     .with_eq("hospital_id", "h-1")
//!     .with_contains(vec!["name", "email", "phone"], "smi")
//!     .with_pagination(Pagination::new(20));
//! ```

pub(crate) mod query;
mod stored_document;

pub use query::{DocumentQuery, Filter, Pagination, SortOrder};
pub use stored_document::{StoredDocument, UniqueKey};
