//! HTTP request handlers for the carenet REST API.
//!
//! Handlers are thin: they extract the caller and the request, pass the
//! current time to a service from [`AppState`](crate::state::AppState) and
//! render the outcome. Authorization and state rules live in the services.
//!
//! - [`health`] - Health and readiness probes
//! - [`auth`] - Registration, login, token refresh, profile
//! - [`hospitals`] - Tenant Directory
//! - [`departments`] - Departments of a hospital
//! - [`users`] - Staff approval and patient search
//! - [`sharing`] - Sharing Ledger
//! - [`records`] - Medical records, prescriptions, test results
//! - [`test_orders`] - Test order lifecycle
//! - [`files`] - Presigned downloads

pub mod auth;
pub mod departments;
pub mod files;
pub mod health;
pub mod hospitals;
pub mod records;
pub mod sharing;
pub mod test_orders;
pub mod users;

pub use health::{health_handler, liveness_handler, readiness_handler};
