//! Axum extractors for carenet requests.
//!
//! - [`AuthenticatedUser`] - Verify the bearer access token
//! - [`Actor`] - An authenticated user allowed to act on tenant data
//! - [`ApiJson`] - JSON bodies with errors in the API envelope
//! - [`ApiQuery`] - Query strings with errors in the API envelope
//! - [`PageQuery`] - `page`/`count` query parameters
//! - [`FileUpload`] - A single multipart file

mod auth;
mod json;
mod pagination;
mod query;
mod upload;

pub use auth::{Actor, AuthenticatedUser, bearer_token};
pub use json::ApiJson;
pub use pagination::PageQuery;
pub use query::ApiQuery;
pub use upload::FileUpload;
