//! Sharing Ledger: directed, admin-approved data-access grants between
//! hospitals.
//!
//! At most one record exists per ordered (requesting, target) pair. The
//! pair is reserved as a unique key when the request is filed and released
//! only when a pending request is cancelled.

use std::sync::Arc;

use async_trait::async_trait;
use carenet_persistence::{DocumentStore, UniqueKey};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{
    Hospital, HospitalSharing, Role, SharingPermissions, SharingScope, SharingStatus,
    SharingUsage, User, new_id,
};
use crate::error::{ConflictKind, DenyReason, RestError, RestResult};
use crate::repository::{Repository, query};

/// Source of active sharing grants, consulted on every cross-tenant read.
#[async_trait]
pub trait GrantLookup: Send + Sync {
    /// Returns the grant that lets `requesting` read data of `target` at
    /// `now`, if any.
    async fn active_grant(
        &self,
        requesting_hospital_id: &str,
        target_hospital_id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<Option<HospitalSharing>>;

    /// Bumps a grant's usage counters. Best-effort.
    async fn record_access(&self, grant_id: &str, now: DateTime<Utc>);
}

/// A sharing request filed by a hospital admin.
#[derive(Debug, Clone, Deserialize)]
pub struct SharingRequest {
    /// Hospital whose data is requested.
    pub target_hospital_id: String,
    /// Why access is needed.
    pub reason: String,
    /// Patient coverage.
    #[serde(default)]
    pub scope: SharingScope,
    /// Covered patients for a limited scope.
    #[serde(default)]
    pub patient_ids: Vec<String>,
    /// Data kinds requested.
    #[serde(default)]
    pub permissions: SharingPermissions,
    /// Requested end of the grant.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filters for listing sharing records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SharingFilter {
    /// Only records in this status.
    #[serde(default)]
    pub status: Option<SharingStatus>,
}

/// Unique key of an ordered hospital pair.
pub fn pair_key(requesting_hospital_id: &str, target_hospital_id: &str) -> UniqueKey {
    UniqueKey::compound(
        "hospital_sharing.pair",
        &[requesting_hospital_id, target_hospital_id],
    )
}

/// The sharing ledger.
pub struct SharingLedger<S> {
    repo: Repository<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S> Clone for SharingLedger<S> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

fn require_super_admin(actor: &User) -> RestResult<()> {
    if actor.role != Role::SuperAdmin {
        return Err(RestError::forbidden(DenyReason::InsufficientRole));
    }
    Ok(())
}

impl<S: DocumentStore> SharingLedger<S> {
    /// Creates the ledger.
    pub fn new(repo: Repository<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, audit }
    }

    async fn audit(&self, actor: &User, action: &str, record_id: &str, now: DateTime<Utc>) {
        self.audit
            .record(AuditEvent::new(
                &actor.id,
                action,
                "hospital_sharing",
                record_id,
                AuditOutcome::Succeeded,
                now,
            ))
            .await;
    }

    async fn audit_rejected(
        &self,
        actor: &User,
        action: &str,
        record_id: &str,
        err: &RestError,
        now: DateTime<Utc>,
    ) {
        self.audit
            .record(
                AuditEvent::new(
                    &actor.id,
                    action,
                    "hospital_sharing",
                    record_id,
                    AuditOutcome::Rejected,
                    now,
                )
                .with_detail(err.code()),
            )
            .await;
    }

    /// Files a pending request from the actor's hospital to the target.
    pub async fn request(
        &self,
        actor: &User,
        request: SharingRequest,
        now: DateTime<Utc>,
    ) -> RestResult<HospitalSharing> {
        if actor.role != Role::HospitalAdmin {
            return Err(RestError::forbidden(DenyReason::InsufficientRole));
        }
        let requesting = actor
            .hospital_id
            .clone()
            .ok_or(RestError::forbidden(DenyReason::NoHospitalAffiliation))?;

        if requesting == request.target_hospital_id {
            return Err(RestError::validation_code(
                "self_sharing",
                "A hospital cannot request sharing with itself",
            ));
        }
        if request.reason.trim().is_empty() {
            return Err(RestError::validation("A reason is required"));
        }
        if request.scope == SharingScope::Limited && request.patient_ids.is_empty() {
            return Err(RestError::validation(
                "A limited sharing scope must list at least one patient",
            ));
        }
        if request.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(RestError::validation("Expiry must be in the future"));
        }

        let target = self
            .repo
            .get::<Hospital>(&request.target_hospital_id)
            .await?
            .into_inner();
        if !target.is_usable(now) {
            return Err(RestError::conflict(
                ConflictKind::TargetNotUsable,
                format!("Hospital {} is not approved or not subscription-active", target.id),
            ));
        }

        let record = HospitalSharing {
            id: new_id(),
            requesting_hospital_id: requesting.clone(),
            target_hospital_id: target.id.clone(),
            status: SharingStatus::Pending,
            is_active: false,
            scope: request.scope,
            patient_ids: match request.scope {
                SharingScope::Full => Vec::new(),
                SharingScope::Limited => request.patient_ids,
            },
            permissions: request.permissions,
            expires_at: request.expires_at,
            reason: request.reason.trim().to_string(),
            requested_by: actor.id.clone(),
            reviewed_by: None,
            approved_at: None,
            closed_at: None,
            decision_reason: None,
            usage: SharingUsage::default(),
            created_at: now,
            updated_at: now,
        };

        let key = pair_key(&requesting, &target.id);
        let record = self
            .repo
            .insert(record, vec![key])
            .await
            .map_err(|e| match e {
                RestError::Duplicate { .. } => RestError::Duplicate {
                    message: format!(
                        "A sharing record from {} to {} already exists",
                        requesting, target.id
                    ),
                },
                other => other,
            })?
            .into_inner();

        info!(
            sharing_id = %record.id,
            requesting_hospital_id = %record.requesting_hospital_id,
            target_hospital_id = %record.target_hospital_id,
            "Sharing requested"
        );
        self.audit(actor, "sharing.request", &record.id, now).await;
        Ok(record)
    }

    /// Approves a pending request. Both hospitals must be usable and have
    /// cross-hospital sharing enabled.
    pub async fn approve(
        &self,
        actor: &User,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RestResult<HospitalSharing> {
        require_super_admin(actor)?;
        let mut record = self.repo.get::<HospitalSharing>(id).await?;

        let result = self.check_approvable(&record.value, expires_at, now).await;
        if let Err(err) = result {
            self.audit_rejected(actor, "sharing.approve", id, &err, now).await;
            return Err(err);
        }

        let r = &mut record.value;
        r.status = SharingStatus::Approved;
        r.is_active = true;
        r.reviewed_by = Some(actor.id.clone());
        r.approved_at = Some(now);
        if expires_at.is_some() {
            r.expires_at = expires_at;
        }
        r.updated_at = now;
        let record = self.repo.save(record).await?.into_inner();

        info!(
            sharing_id = %record.id,
            expires_at = ?record.expires_at,
            "Sharing approved"
        );
        self.audit(actor, "sharing.approve", &record.id, now).await;
        Ok(record)
    }

    async fn check_approvable(
        &self,
        record: &HospitalSharing,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RestResult<()> {
        if record.status != SharingStatus::Pending {
            return Err(RestError::conflict(
                ConflictKind::NotPending,
                format!("Sharing record {} is not pending", record.id),
            ));
        }
        if expires_at
            .or(record.expires_at)
            .is_some_and(|expires_at| expires_at <= now)
        {
            return Err(RestError::validation("Expiry must be in the future"));
        }

        for hospital_id in [&record.requesting_hospital_id, &record.target_hospital_id] {
            let eligible = self
                .repo
                .find::<Hospital>(hospital_id)
                .await?
                .is_some_and(|h| h.value.is_usable(now) && h.value.features.cross_hospital_sharing);
            if !eligible {
                return Err(RestError::conflict(
                    ConflictKind::HospitalsNotEligible,
                    format!(
                        "Hospital {} is not usable or has cross-hospital sharing disabled",
                        hospital_id
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Rejects a pending request.
    pub async fn reject(
        &self,
        actor: &User,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> RestResult<HospitalSharing> {
        require_super_admin(actor)?;
        let mut record = self.repo.get::<HospitalSharing>(id).await?;
        if record.value.status != SharingStatus::Pending {
            let err = RestError::conflict(
                ConflictKind::NotPending,
                format!("Sharing record {} is not pending", id),
            );
            self.audit_rejected(actor, "sharing.reject", id, &err, now).await;
            return Err(err);
        }

        let r = &mut record.value;
        r.status = SharingStatus::Rejected;
        r.is_active = false;
        r.reviewed_by = Some(actor.id.clone());
        r.closed_at = Some(now);
        r.decision_reason = reason;
        r.updated_at = now;
        let record = self.repo.save(record).await?.into_inner();

        info!(sharing_id = %record.id, "Sharing rejected");
        self.audit(actor, "sharing.reject", &record.id, now).await;
        Ok(record)
    }

    /// Revokes an approved grant. Revocation is terminal.
    pub async fn revoke(
        &self,
        actor: &User,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> RestResult<HospitalSharing> {
        require_super_admin(actor)?;
        let mut record = self.repo.get::<HospitalSharing>(id).await?;
        if record.value.status != SharingStatus::Approved {
            let err = RestError::conflict(
                ConflictKind::NotApproved,
                format!("Sharing record {} is not approved", id),
            );
            self.audit_rejected(actor, "sharing.revoke", id, &err, now).await;
            return Err(err);
        }

        let r = &mut record.value;
        r.status = SharingStatus::Revoked;
        r.is_active = false;
        r.reviewed_by = Some(actor.id.clone());
        r.closed_at = Some(now);
        r.decision_reason = reason;
        r.updated_at = now;
        let record = self.repo.save(record).await?.into_inner();

        info!(sharing_id = %record.id, "Sharing revoked");
        self.audit(actor, "sharing.revoke", &record.id, now).await;
        Ok(record)
    }

    /// Deletes a pending request. Only the requesting hospital's admin may
    /// cancel.
    pub async fn cancel(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<()> {
        let record = self.repo.get::<HospitalSharing>(id).await?.into_inner();
        if actor.role != Role::HospitalAdmin {
            return Err(RestError::forbidden(DenyReason::InsufficientRole));
        }
        if actor.hospital_id.as_deref() != Some(record.requesting_hospital_id.as_str()) {
            return Err(RestError::forbidden(DenyReason::OtherTenant));
        }
        if record.status != SharingStatus::Pending {
            return Err(RestError::conflict(
                ConflictKind::NotPending,
                format!("Sharing record {} is not pending", id),
            ));
        }

        self.repo.remove::<HospitalSharing>(id).await?;
        info!(sharing_id = %id, "Sharing request cancelled");
        self.audit(actor, "sharing.cancel", id, now).await;
        Ok(())
    }

    /// Reads a record visible to the actor.
    pub async fn get(&self, actor: &User, id: &str) -> RestResult<HospitalSharing> {
        let record = self.repo.get::<HospitalSharing>(id).await?.into_inner();
        let visible = actor.role == Role::SuperAdmin
            || (actor.role == Role::HospitalAdmin
                && actor.hospital_id.as_deref().is_some_and(|h| {
                    h == record.requesting_hospital_id || h == record.target_hospital_id
                }));
        if !visible {
            return Err(RestError::forbidden(DenyReason::OtherTenant));
        }
        Ok(record)
    }

    /// Lists records visible to the actor, newest first. Super admins see
    /// everything; hospital admins see records where their hospital is a
    /// party.
    pub async fn list(
        &self,
        actor: &User,
        filter: &SharingFilter,
    ) -> RestResult<Vec<HospitalSharing>> {
        let with_status = |q: carenet_persistence::DocumentQuery| match filter.status {
            Some(status) => q.with_eq("status", serde_json::json!(status)),
            None => q,
        };

        let mut records = match actor.role {
            Role::SuperAdmin => {
                self.repo
                    .list::<HospitalSharing>(&with_status(query::<HospitalSharing>()))
                    .await?
            }
            Role::HospitalAdmin => {
                let hospital_id = actor
                    .hospital_id
                    .as_deref()
                    .ok_or(RestError::forbidden(DenyReason::NoHospitalAffiliation))?;
                let mut outgoing = self
                    .repo
                    .list::<HospitalSharing>(&with_status(
                        query::<HospitalSharing>().with_eq("requesting_hospital_id", hospital_id),
                    ))
                    .await?;
                let incoming = self
                    .repo
                    .list::<HospitalSharing>(&with_status(
                        query::<HospitalSharing>().with_eq("target_hospital_id", hospital_id),
                    ))
                    .await?;
                outgoing.extend(incoming);
                outgoing
            }
            _ => return Err(RestError::forbidden(DenyReason::InsufficientRole)),
        };

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[async_trait]
impl<S: DocumentStore> GrantLookup for SharingLedger<S> {
    async fn active_grant(
        &self,
        requesting_hospital_id: &str,
        target_hospital_id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<Option<HospitalSharing>> {
        let found = self
            .repo
            .first::<HospitalSharing>(
                &query::<HospitalSharing>()
                    .with_eq("requesting_hospital_id", requesting_hospital_id)
                    .with_eq("target_hospital_id", target_hospital_id),
            )
            .await?;
        let Some(record) = found else {
            return Ok(None);
        };

        if record.value.can_access(now) {
            return Ok(Some(record.into_inner()));
        }
        debug!(
            sharing_id = %record.value.id,
            status = ?record.value.status,
            is_active = record.value.is_active,
            "Sharing record does not grant access"
        );
        Ok(None)
    }

    async fn record_access(&self, grant_id: &str, now: DateTime<Utc>) {
        let mut record = match self.repo.get::<HospitalSharing>(grant_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(sharing_id = %grant_id, error = %e, "Failed to load grant for usage update");
                return;
            }
        };
        record.value.usage.access_count += 1;
        record.value.usage.last_accessed_at = Some(now);
        if let Err(e) = self.repo.save(record).await {
            warn!(sharing_id = %grant_id, error = %e, "Failed to update grant usage");
        }
    }
}
