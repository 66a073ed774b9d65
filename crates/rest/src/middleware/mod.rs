//! HTTP middleware for the carenet REST API.
//!
//! - [`error_detail`] - Development-mode detail on internal errors
//! - [`request_id`] - `x-request-id` generation and propagation

pub mod error_detail;
pub mod request_id;

pub use error_detail::error_detail_middleware;
pub use request_id::X_REQUEST_ID;
