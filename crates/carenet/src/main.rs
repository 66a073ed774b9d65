//! Carenet server
//!
//! Multi-tenant hospital records REST API over SQLite and object storage.

use std::sync::Arc;

use carenet_persistence::backends::sqlite::SqliteBackend;
use carenet_persistence::{BlobStore, ObjectBlobStore};
use carenet_rest::audit::StorageAuditSink;
use carenet_rest::{AppState, ServerConfig, create_app_with_state, init_logging};
use chrono::{Duration, Utc};
use clap::Parser;
use tracing::{info, warn};

/// Creates and initializes the SQLite backend from the server configuration.
fn create_sqlite_backend(config: &ServerConfig) -> anyhow::Result<SqliteBackend> {
    info!(database = %config.database_url, "Initializing SQLite backend");
    let backend = if config.database_url == ":memory:" {
        SqliteBackend::in_memory()?
    } else {
        SqliteBackend::open(&config.database_url)?
    };
    backend.init_schema()?;
    Ok(backend)
}

/// Creates the blob store: a local directory when configured, memory otherwise.
fn create_blob_store(config: &ServerConfig) -> anyhow::Result<ObjectBlobStore> {
    let ttl = Duration::seconds(config.presign_ttl as i64);
    let secret = config.jwt_secret.as_bytes().to_vec();
    let store = match &config.blob_root {
        Some(root) => {
            info!(root = %root, "Storing files on local disk");
            ObjectBlobStore::local(root, config.public_base_url.clone(), secret, ttl)?
        }
        None => {
            warn!("No blob root configured; uploaded files are kept in memory");
            ObjectBlobStore::in_memory(config.public_base_url.clone(), secret, ttl)
        }
    };
    Ok(store)
}

/// Creates the bootstrap super admin when credentials are configured.
async fn bootstrap(state: &AppState<SqliteBackend>) -> anyhow::Result<()> {
    let config = state.config();
    let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) else {
        return Ok(());
    };
    let admin = state
        .sessions()
        .bootstrap_super_admin(email, password, Utc::now())
        .await?;
    info!(user_id = %admin.id, email = %admin.email, "Super admin ready");
    Ok(())
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Starts the Axum HTTP server.
async fn serve(app: axum::Router, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        port = config.port,
        host = %config.host,
        environment = ?config.environment,
        "Starting carenet server"
    );

    let storage = Arc::new(create_sqlite_backend(&config)?);
    let blobs: Arc<dyn BlobStore> = Arc::new(create_blob_store(&config)?);
    let audit = Arc::new(StorageAuditSink::new(Arc::clone(&storage)));
    let state = AppState::with_parts(storage, config.clone(), audit, blobs);
    bootstrap(&state).await?;

    let app = create_app_with_state(state);
    serve(app, &config).await
}
