//! Application state for the carenet REST API.
//!
//! This module defines the shared application state that is available to all
//! request handlers: the storage backend, configuration, token service, audit
//! sink and blob store. Services are cheap views over this state and are
//! constructed per request.

use std::sync::Arc;

use carenet_persistence::{BlobStore, DocumentStore, ObjectBlobStore};
use chrono::Duration;

use crate::access::Authorizer;
use crate::audit::{AuditSink, StorageAuditSink};
use crate::config::ServerConfig;
use crate::departments::Departments;
use crate::directory::Directory;
use crate::identity::{SessionService, TokenService};
use crate::records::ClinicalRecords;
use crate::repository::Repository;
use crate::sharing::SharingLedger;
use crate::test_orders::TestOrders;
use crate::users::UserAdmin;

/// Shared application state for the REST API.
///
/// # Type Parameters
///
/// * `S` - The storage backend type (must implement [`DocumentStore`])
///
/// # Example
///
/// ```rust,ignore
/// use carenet_rest::{AppState, ServerConfig};
/// use carenet_persistence::backends::sqlite::SqliteBackend;
/// use std::sync::Arc;
///
/// let backend = SqliteBackend::in_memory()?;
/// let state = AppState::new(Arc::new(backend), ServerConfig::for_testing());
/// ```
pub struct AppState<S> {
    /// The storage backend.
    storage: Arc<S>,

    /// Server configuration.
    config: Arc<ServerConfig>,

    /// Token codec.
    tokens: TokenService,

    /// Audit sink.
    audit: Arc<dyn AuditSink>,

    /// Uploaded files.
    blobs: Arc<dyn BlobStore>,
}

// Manually implement Clone since S is wrapped in Arc and doesn't need to be Clone
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: Arc::clone(&self.config),
            tokens: self.tokens.clone(),
            audit: Arc::clone(&self.audit),
            blobs: Arc::clone(&self.blobs),
        }
    }
}

impl<S: DocumentStore + 'static> AppState<S> {
    /// Creates state that audits into the document store and keeps uploads
    /// in memory.
    pub fn new(storage: Arc<S>, config: ServerConfig) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(StorageAuditSink::new(Arc::clone(&storage)));
        let blobs: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::in_memory(
            config.public_base_url.clone(),
            config.jwt_secret.as_bytes().to_vec(),
            Duration::seconds(config.presign_ttl as i64),
        ));
        Self::with_parts(storage, config, audit, blobs)
    }

    /// Creates state from explicit parts.
    pub fn with_parts(
        storage: Arc<S>,
        config: ServerConfig,
        audit: Arc<dyn AuditSink>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            tokens: TokenService::from_config(&config),
            storage,
            config: Arc::new(config),
            audit,
            blobs,
        }
    }
}

impl<S: DocumentStore> AppState<S> {
    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns a reference to the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the audit sink.
    pub fn audit(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    /// Returns the blob store.
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Typed repository over the storage backend.
    pub fn repository(&self) -> Repository<S> {
        Repository::new(Arc::clone(&self.storage))
    }

    /// Identity and session operations.
    pub fn sessions(&self) -> SessionService<S> {
        SessionService::new(
            self.repository(),
            self.tokens.clone(),
            self.audit(),
            self.config.password_rounds,
        )
    }

    /// Tenant Directory.
    pub fn directory(&self) -> Directory<S> {
        Directory::new(
            self.repository(),
            self.sessions(),
            self.audit(),
            self.config.subscription_days,
        )
    }

    /// Department management.
    pub fn departments(&self) -> Departments<S> {
        Departments::new(self.repository(), self.sessions(), self.audit())
    }

    /// User approval and lookups.
    pub fn users(&self) -> UserAdmin<S> {
        UserAdmin::new(self.repository(), self.audit())
    }

    /// Sharing Ledger.
    pub fn sharing(&self) -> SharingLedger<S> {
        SharingLedger::new(self.repository(), self.audit())
    }

    /// Access Authorizer backed by the Sharing Ledger.
    pub fn authorizer(&self) -> Authorizer<SharingLedger<S>> {
        Authorizer::new(self.sharing(), self.audit())
    }

    /// Clinical records.
    pub fn records(&self) -> ClinicalRecords<S, SharingLedger<S>> {
        ClinicalRecords::new(
            self.repository(),
            self.authorizer(),
            Arc::clone(&self.blobs),
            self.config.max_upload_size,
        )
    }

    /// Test order lifecycle.
    pub fn test_orders(&self) -> TestOrders<S, SharingLedger<S>> {
        TestOrders::new(
            self.repository(),
            self.authorizer(),
            Arc::clone(&self.blobs),
            self.audit(),
            self.config.max_upload_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carenet_persistence::backends::sqlite::SqliteBackend;

    #[test]
    fn test_state_clone_shares_storage() {
        let backend = SqliteBackend::in_memory().unwrap();
        let state = AppState::new(Arc::new(backend), ServerConfig::for_testing());
        let cloned = state.clone();
        assert!(std::ptr::eq(state.storage(), cloned.storage()));
        assert_eq!(cloned.config().port, state.config().port);
    }
}
