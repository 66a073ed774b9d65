//! # carenet-rest - Multi-tenant hospital records REST API
//!
//! This crate provides the HTTP surface of carenet: hospitals register as
//! tenants, staff and patients authenticate with bearer tokens, clinical
//! records stay inside their hospital unless a sharing agreement lets a
//! partner hospital read them, and test orders move through a payment-aware
//! state machine.
//!
//! ## Features
//!
//! - **Identity**: Registration, password login, rotating refresh tokens
//! - **Tenant Directory**: Hospital approval, subscriptions, departments
//! - **Sharing Ledger**: Directed, expiring, scoped read grants between hospitals
//! - **Access Authorizer**: One decision point for every clinical read and write
//! - **Test Orders**: Compare-and-swap state machine with payment gating
//! - **Uploads**: Size-capped, type-checked files behind presigned URLs
//! - **Audit**: Every authorization decision and transition is recorded
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use carenet_rest::{ServerConfig, create_app_with_config};
//! use carenet_persistence::backends::sqlite::SqliteBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let backend = SqliteBackend::in_memory()?;
//!     backend.init_schema()?;
//!
//!     let app = create_app_with_config(backend, config.clone());
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Errors render as `{"error": {"category", "code", "message"}}`:
//!
//! | Category | HTTP Status | Example code |
//! |----------|-------------|--------------|
//! | unauthenticated | 401 | `expired_credential` |
//! | forbidden | 403 | `sharing_permission_denied` |
//! | validation | 400 | `weak_password` |
//! | not_found | 404 | `not_found` |
//! | state_conflict | 409 | `payment_required` |
//! | duplicate | 409 | `duplicate` |
//! | payload_too_large | 413 | `payload_too_large` |
//! | unsupported_media_type | 415 | `unsupported_media_type` |
//! | internal | 500 | `internal_error` |
//!
//! ## Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CARENET_SERVER_PORT` | 8080 | Server port |
//! | `CARENET_SERVER_HOST` | 127.0.0.1 | Host to bind |
//! | `CARENET_LOG_LEVEL` | info | Log level |
//! | `CARENET_ENVIRONMENT` | development | Adds error detail in development |
//! | `CARENET_DATABASE_URL` | carenet.db | SQLite path or `:memory:` |
//! | `CARENET_JWT_SECRET` | (dev secret) | Token and URL signing key |
//! | `CARENET_MAX_UPLOAD_SIZE` | 10485760 | Upload cap in bytes |
//! | `CARENET_BLOB_ROOT` | (memory) | Directory for uploaded files |

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod audit;
pub mod config;
pub mod departments;
pub mod directory;
pub mod domain;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod records;
pub mod repository;
pub mod routing;
pub mod sharing;
pub mod state;
pub mod test_orders;
pub mod uploads;
pub mod users;

// Re-export commonly used types
pub use config::{Environment, ServerConfig};
pub use error::{RestError, RestResult};
pub use state::AppState;

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};
use carenet_persistence::DocumentStore;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::middleware::request_id::{
    make_request_span, propagate_request_id_layer, set_request_id_layer,
};

/// Multipart framing allowance on top of the upload cap.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Creates the Axum application with default configuration.
///
/// This is a convenience function that creates the app with default settings.
/// For more control, use [`create_app_with_config`].
pub fn create_app<S>(storage: S) -> Router
where
    S: DocumentStore + 'static,
{
    create_app_with_config(storage, ServerConfig::default())
}

/// Creates the Axum application with custom configuration.
///
/// Audit events go to the document store and uploads are kept in memory.
/// Use [`create_app_with_state`] to supply other sinks.
///
/// # Example
///
/// ```rust,ignore
/// use carenet_rest::{create_app_with_config, ServerConfig};
/// use carenet_persistence::backends::sqlite::SqliteBackend;
///
/// let backend = SqliteBackend::in_memory()?;
/// let config = ServerConfig {
///     port: 3000,
///     enable_cors: true,
///     ..Default::default()
/// };
/// let app = create_app_with_config(backend, config);
/// ```
pub fn create_app_with_config<S>(storage: S, config: ServerConfig) -> Router
where
    S: DocumentStore + 'static,
{
    create_app_with_state(AppState::new(Arc::new(storage), config))
}

/// Creates the Axum application around prepared state.
///
/// This sets up all routes and the middleware stack: request IDs, tracing,
/// timeouts, body limits, CORS and development-mode error detail.
pub fn create_app_with_state<S>(state: AppState<S>) -> Router
where
    S: DocumentStore + 'static,
{
    let config = state.config().clone();
    info!(
        "Creating REST API server with backend: {}",
        state.storage().backend_name()
    );

    let router = routing::create_routes(state);

    let body_limit = config
        .max_body_size
        .max(config.max_upload_size + MULTIPART_OVERHEAD);

    // Build middleware stack
    let service_builder = ServiceBuilder::new()
        .layer(set_request_id_layer())
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<axum::body::Body>))
        .layer(propagate_request_id_layer())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(config.request_timeout),
        ));

    let router = router.layer(DefaultBodyLimit::max(body_limit));

    let router = if config.environment.is_development() {
        router.layer(axum::middleware::from_fn(
            middleware::error_detail_middleware,
        ))
    } else {
        router
    };

    // Add CORS if enabled
    let router = if config.enable_cors {
        let cors = build_cors_layer(&config);
        router.layer(cors)
    } else {
        router
    };

    // Apply remaining middleware
    router.layer(service_builder)
}

/// Builds the CORS layer based on configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let mut cors = CorsLayer::new();

    // Configure origins
    if config.cors_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    // Configure methods
    if config.cors_methods == "*" {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Vec<_> = config
            .cors_methods
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_methods(methods);
    }

    // Configure headers
    if config.cors_headers == "*" {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<_> = config
            .cors_headers
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    cors
}

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup. `RUST_LOG` overrides
/// the level when set.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "carenet_rest={level},carenet_persistence={level},carenet={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
