//! Append-only audit trail.
//!
//! Every authorization decision on clinical data and every lifecycle
//! transition is recorded as an immutable [`AuditEvent`]. Services depend on
//! the [`AuditSink`] trait only; recording is best-effort and never fails the
//! request that produced the event.

use std::sync::Arc;

use async_trait::async_trait;
use carenet_persistence::DocumentStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{collections, new_id};

/// Result of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Access decision: allowed.
    Allowed,
    /// Access decision: denied.
    Denied,
    /// Transition applied.
    Succeeded,
    /// Transition rejected by a guard.
    Rejected,
}

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event ID.
    pub id: String,
    /// Acting user (or `anonymous`).
    pub actor_id: String,
    /// Action name, e.g. `read` or `test_order.start`.
    pub action: String,
    /// Kind of resource acted upon.
    pub resource_type: String,
    /// ID of the resource acted upon.
    pub resource_id: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Machine-readable reason or grant detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Creates an event stamped at `timestamp`.
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        outcome: AuditOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            actor_id: actor_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            timestamp,
            outcome,
            detail: None,
        }
    }

    /// Attaches a detail string.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Consumer of audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one event.
    async fn record(&self, event: AuditEvent);
}

/// Appends events to the `audit_events` collection and mirrors them on the
/// `carenet::audit` tracing target.
pub struct StorageAuditSink<S> {
    store: Arc<S>,
}

impl<S> StorageAuditSink<S> {
    /// Creates a sink writing to `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> AuditSink for StorageAuditSink<S> {
    async fn record(&self, event: AuditEvent) {
        info!(
            target: "carenet::audit",
            actor_id = %event.actor_id,
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            outcome = ?event.outcome,
            detail = event.detail.as_deref().unwrap_or(""),
        );

        let content = match serde_json::to_value(&event) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Failed to encode audit event");
                return;
            }
        };
        if let Err(e) = self
            .store
            .create(collections::AUDIT_EVENTS, &event.id, content, Vec::new())
            .await
        {
            warn!(error = %e, event_id = %event.id, "Failed to persist audit event");
        }
    }
}

/// Keeps events in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carenet_persistence::DocumentQuery;
    use carenet_persistence::backends::sqlite::SqliteBackend;

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let now = Utc::now();
        sink.record(AuditEvent::new("u-1", "read", "medical_record", "r-1", AuditOutcome::Allowed, now))
            .await;
        sink.record(
            AuditEvent::new("u-2", "read", "medical_record", "r-1", AuditOutcome::Denied, now)
                .with_detail("other_tenant"),
        )
        .await;

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].detail.as_deref(), Some("other_tenant"));
    }

    #[tokio::test]
    async fn test_storage_sink_appends() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        let store = Arc::new(backend);
        let sink = StorageAuditSink::new(Arc::clone(&store));

        sink.record(AuditEvent::new(
            "u-1",
            "hospital.approve",
            "hospital",
            "h-1",
            AuditOutcome::Succeeded,
            Utc::now(),
        ))
        .await;

        let count = store
            .count(&DocumentQuery::new(collections::AUDIT_EVENTS).with_eq("action", "hospital.approve"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
