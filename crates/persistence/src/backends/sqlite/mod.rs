//! SQLite backend.
//!
//! Documents live in a single `documents` table keyed by `(collection, id)`
//! with the JSON body stored as text, so field filters compile to
//! `json_extract` expressions. Unique keys are rows in `unique_keys`, inserted
//! in the same transaction as the document that owns them.
//!
//! # Example
//!
//! ```no_run
//! use carenet_persistence::backends::sqlite::{SqliteBackend, SqliteBackendConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SqliteBackendConfig {
//!     max_connections: 4,
//!     ..Default::default()
//! };
//! let backend = SqliteBackend::with_config("./carenet.db", config)?;
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod schema;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
