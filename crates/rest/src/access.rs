//! Access Authorizer.
//!
//! One decision function per direction decides whether an actor may read or
//! write a patient-scoped resource. Reads follow a strict priority chain;
//! the first matching rule wins:
//!
//! | # | Actor | Condition | Decision |
//! |---|-------|-----------|----------|
//! | 1 | super admin | | allow |
//! | 2 | patient | owns the data | allow |
//! | 3 | hospital admin, doctor, nurse | same hospital | allow |
//! | 4 | hospital admin, doctor, nurse | active sharing grant to the owning hospital | allow (read only) |
//! | 5 | department staff | | deny |
//! | 6 | anyone else | | deny |
//!
//! Writes additionally require the author or a hospital admin of the owning
//! hospital. A sharing grant never confers write access. Grants are looked
//! up on every decision, so expiry and revocation apply immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{Role, SharingPermissions, User};
use crate::error::{DenyReason, RestError, RestResult};
use crate::sharing::GrantLookup;

/// Kind of patient-scoped resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Medical record.
    MedicalRecord,
    /// Prescription.
    Prescription,
    /// Test result.
    TestResult,
    /// Test order.
    TestOrder,
}

impl ResourceKind {
    /// Snake-case name used in audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::MedicalRecord => "medical_record",
            ResourceKind::Prescription => "prescription",
            ResourceKind::TestResult => "test_result",
            ResourceKind::TestOrder => "test_order",
        }
    }

    /// Whether a grant's permission flags cover this kind.
    pub fn permitted_by(&self, permissions: &SharingPermissions) -> bool {
        match self {
            ResourceKind::MedicalRecord => permissions.view_medical_records,
            ResourceKind::Prescription => permissions.view_prescriptions,
            ResourceKind::TestResult | ResourceKind::TestOrder => permissions.view_test_results,
        }
    }

    /// Roles that may create this kind of resource.
    fn authors(&self) -> &'static [Role] {
        match self {
            ResourceKind::MedicalRecord => &[Role::Doctor, Role::Nurse],
            ResourceKind::Prescription | ResourceKind::TestOrder => &[Role::Doctor],
            ResourceKind::TestResult => &[Role::DepartmentStaff],
        }
    }
}

/// The resource an actor is reaching for.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Kind of resource.
    pub kind: ResourceKind,
    /// Resource ID (or the patient ID for collection reads).
    pub id: &'a str,
    /// Owning patient.
    pub patient_id: &'a str,
    /// Owning hospital.
    pub hospital_id: &'a str,
    /// Author, for existing resources.
    pub author_id: Option<&'a str>,
}

/// The hospital owning a patient's data. A patient without one can never be
/// a target.
pub fn owning_hospital(patient: &User) -> RestResult<&str> {
    patient
        .hospital_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(RestError::forbidden(DenyReason::NoHospitalAffiliation))
}

/// Which rule allowed a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadAccess {
    /// Rule 1.
    SuperAdmin,
    /// Rule 2.
    OwnData,
    /// Rule 3.
    SameTenant,
    /// Rule 4.
    Sharing {
        /// The grant used.
        grant_id: String,
        /// Diagnosis fields must be withheld.
        redact_diagnosis: bool,
    },
}

impl ReadAccess {
    /// True when diagnosis fields must be withheld.
    pub fn redact_diagnosis(&self) -> bool {
        matches!(
            self,
            ReadAccess::Sharing {
                redact_diagnosis: true,
                ..
            }
        )
    }
}

/// A write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Creating a new resource.
    Create,
    /// Modifying an existing one.
    Update,
}

impl WriteAction {
    fn as_str(&self) -> &'static str {
        match self {
            WriteAction::Create => "create",
            WriteAction::Update => "update",
        }
    }
}

/// An access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<A> {
    /// Allowed, with the rule that matched.
    Allow(A),
    /// Denied, with the failed precondition.
    Deny(DenyReason),
}

/// The decision core.
pub struct Authorizer<G> {
    grants: G,
    audit: Arc<dyn AuditSink>,
}

impl<G: GrantLookup> Authorizer<G> {
    /// Creates an authorizer over a grant source.
    pub fn new(grants: G, audit: Arc<dyn AuditSink>) -> Self {
        Self { grants, audit }
    }

    /// Evaluates the read chain without side effects.
    pub async fn decide_read(
        &self,
        actor: &User,
        target: &Target<'_>,
        now: DateTime<Utc>,
    ) -> RestResult<Decision<ReadAccess>> {
        let decision = match actor.role {
            Role::SuperAdmin => Decision::Allow(ReadAccess::SuperAdmin),
            Role::Patient if actor.id == target.patient_id => Decision::Allow(ReadAccess::OwnData),
            Role::Patient => Decision::Deny(DenyReason::NotOwnData),
            Role::HospitalAdmin | Role::Doctor | Role::Nurse => {
                let Some(hospital_id) = actor.hospital_id.as_deref() else {
                    return Ok(Decision::Deny(DenyReason::NoHospitalAffiliation));
                };
                if hospital_id == target.hospital_id {
                    Decision::Allow(ReadAccess::SameTenant)
                } else {
                    self.cross_tenant(hospital_id, target, now).await?
                }
            }
            Role::DepartmentStaff => Decision::Deny(DenyReason::DepartmentStaffRecordAccess),
            Role::PendingApproval => Decision::Deny(DenyReason::PendingApproval),
        };
        Ok(decision)
    }

    async fn cross_tenant(
        &self,
        hospital_id: &str,
        target: &Target<'_>,
        now: DateTime<Utc>,
    ) -> RestResult<Decision<ReadAccess>> {
        let Some(grant) = self
            .grants
            .active_grant(hospital_id, target.hospital_id, now)
            .await?
        else {
            return Ok(Decision::Deny(DenyReason::OtherTenant));
        };
        if !target.kind.permitted_by(&grant.permissions) {
            return Ok(Decision::Deny(DenyReason::SharingPermissionDenied));
        }
        if !grant.covers_patient(target.patient_id) {
            return Ok(Decision::Deny(DenyReason::PatientOutOfScope));
        }
        Ok(Decision::Allow(ReadAccess::Sharing {
            grant_id: grant.id,
            redact_diagnosis: target.kind == ResourceKind::MedicalRecord
                && !grant.permissions.view_diagnosis,
        }))
    }

    /// Evaluates write rules without side effects.
    pub async fn decide_write(
        &self,
        actor: &User,
        target: &Target<'_>,
        action: WriteAction,
        now: DateTime<Utc>,
    ) -> RestResult<Decision<()>> {
        let decision = match actor.role {
            Role::SuperAdmin | Role::Patient => Decision::Deny(DenyReason::InsufficientRole),
            Role::PendingApproval => Decision::Deny(DenyReason::PendingApproval),
            Role::DepartmentStaff if target.kind != ResourceKind::TestResult => {
                Decision::Deny(DenyReason::DepartmentStaffRecordAccess)
            }
            Role::HospitalAdmin | Role::Doctor | Role::Nurse | Role::DepartmentStaff => {
                let Some(hospital_id) = actor.hospital_id.as_deref() else {
                    return Ok(Decision::Deny(DenyReason::NoHospitalAffiliation));
                };
                if hospital_id != target.hospital_id {
                    let granted = self
                        .grants
                        .active_grant(hospital_id, target.hospital_id, now)
                        .await?
                        .is_some();
                    Decision::Deny(if granted {
                        DenyReason::SharingReadOnly
                    } else {
                        DenyReason::OtherTenant
                    })
                } else {
                    match action {
                        WriteAction::Create if target.kind.authors().contains(&actor.role) => {
                            Decision::Allow(())
                        }
                        WriteAction::Create => Decision::Deny(DenyReason::InsufficientRole),
                        WriteAction::Update
                            if actor.role == Role::HospitalAdmin
                                || target.author_id == Some(actor.id.as_str()) =>
                        {
                            Decision::Allow(())
                        }
                        WriteAction::Update => Decision::Deny(DenyReason::NotAuthor),
                    }
                }
            }
        };
        Ok(decision)
    }

    /// Decides a read, records the decision and bumps grant usage.
    pub async fn authorize_read(
        &self,
        actor: &User,
        target: &Target<'_>,
        now: DateTime<Utc>,
    ) -> RestResult<ReadAccess> {
        let decision = self.decide_read(actor, target, now).await?;
        let action = format!("{}.read", target.kind.as_str());
        match decision {
            Decision::Allow(access) => {
                let detail = match &access {
                    ReadAccess::SuperAdmin => "super_admin".to_string(),
                    ReadAccess::OwnData => "own_data".to_string(),
                    ReadAccess::SameTenant => "same_tenant".to_string(),
                    ReadAccess::Sharing { grant_id, .. } => format!("sharing:{}", grant_id),
                };
                debug!(actor_id = %actor.id, resource_id = %target.id, rule = %detail, "Read allowed");
                self.record(actor, &action, target, AuditOutcome::Allowed, detail, now)
                    .await;
                if let ReadAccess::Sharing { grant_id, .. } = &access {
                    self.grants.record_access(grant_id, now).await;
                }
                Ok(access)
            }
            Decision::Deny(reason) => {
                warn!(
                    actor_id = %actor.id,
                    resource_id = %target.id,
                    reason = reason.code(),
                    "Read denied"
                );
                self.record(actor, &action, target, AuditOutcome::Denied, reason.code().to_string(), now)
                    .await;
                Err(RestError::forbidden(reason))
            }
        }
    }

    /// Decides a write and records the decision.
    pub async fn authorize_write(
        &self,
        actor: &User,
        target: &Target<'_>,
        action: WriteAction,
        now: DateTime<Utc>,
    ) -> RestResult<()> {
        let decision = self.decide_write(actor, target, action, now).await?;
        let name = format!("{}.{}", target.kind.as_str(), action.as_str());
        match decision {
            Decision::Allow(()) => {
                self.record(actor, &name, target, AuditOutcome::Allowed, String::new(), now)
                    .await;
                Ok(())
            }
            Decision::Deny(reason) => {
                warn!(
                    actor_id = %actor.id,
                    resource_id = %target.id,
                    action = %name,
                    reason = reason.code(),
                    "Write denied"
                );
                self.record(actor, &name, target, AuditOutcome::Denied, reason.code().to_string(), now)
                    .await;
                Err(RestError::forbidden(reason))
            }
        }
    }

    async fn record(
        &self,
        actor: &User,
        action: &str,
        target: &Target<'_>,
        outcome: AuditOutcome,
        detail: String,
        now: DateTime<Utc>,
    ) {
        let mut event = AuditEvent::new(
            &actor.id,
            action,
            target.kind.as_str(),
            target.id,
            outcome,
            now,
        );
        if !detail.is_empty() {
            event = event.with_detail(detail);
        }
        self.audit.record(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::domain::{
        HospitalSharing, SharingScope, SharingStatus, SharingUsage,
    };
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Mutex;

    /// Grants held in memory, evaluated with the real `can_access` predicate.
    #[derive(Default)]
    struct Grants {
        records: Vec<HospitalSharing>,
        accesses: Mutex<u32>,
    }

    #[async_trait]
    impl GrantLookup for Grants {
        async fn active_grant(
            &self,
            requesting: &str,
            target: &str,
            now: DateTime<Utc>,
        ) -> RestResult<Option<HospitalSharing>> {
            Ok(self
                .records
                .iter()
                .find(|g| {
                    g.requesting_hospital_id == requesting
                        && g.target_hospital_id == target
                        && g.can_access(now)
                })
                .cloned())
        }

        async fn record_access(&self, _grant_id: &str, _now: DateTime<Utc>) {
            *self.accesses.lock().await += 1;
        }
    }

    fn grant(requesting: &str, target: &str) -> HospitalSharing {
        let now = Utc::now();
        HospitalSharing {
            id: format!("{}->{}", requesting, target),
            requesting_hospital_id: requesting.to_string(),
            target_hospital_id: target.to_string(),
            status: SharingStatus::Approved,
            is_active: true,
            scope: SharingScope::Full,
            patient_ids: vec![],
            permissions: SharingPermissions::default(),
            expires_at: None,
            reason: "referral".to_string(),
            requested_by: "admin".to_string(),
            reviewed_by: Some("root".to_string()),
            approved_at: Some(now),
            closed_at: None,
            decision_reason: None,
            usage: SharingUsage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn actor(id: &str, role: Role, hospital: Option<&str>) -> User {
        let mut user = User::new(
            id.to_string(),
            &format!("{}@example.org", id),
            String::new(),
            id.to_string(),
            role,
            Utc::now(),
        );
        user.hospital_id = hospital.map(String::from);
        user
    }

    fn record<'a>(hospital: &'a str, author: Option<&'a str>) -> Target<'a> {
        Target {
            kind: ResourceKind::MedicalRecord,
            id: "rec-1",
            patient_id: "pat-1",
            hospital_id: hospital,
            author_id: author,
        }
    }

    fn authorizer(records: Vec<HospitalSharing>) -> (Authorizer<Grants>, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let grants = Grants {
            records,
            ..Default::default()
        };
        (Authorizer::new(grants, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_super_admin_reads_everything() {
        let (authz, _) = authorizer(vec![]);
        let root = actor("root", Role::SuperAdmin, None);
        let decision = authz.decide_read(&root, &record("h-2", None), Utc::now()).await.unwrap();
        assert_eq!(decision, Decision::Allow(ReadAccess::SuperAdmin));
    }

    #[tokio::test]
    async fn test_patient_reads_own_data_from_any_hospital() {
        let (authz, _) = authorizer(vec![]);
        let patient = actor("pat-1", Role::Patient, Some("h-1"));
        for hospital in ["h-1", "h-2", "h-3"] {
            let decision = authz
                .decide_read(&patient, &record(hospital, Some("doc-9")), Utc::now())
                .await
                .unwrap();
            assert_eq!(decision, Decision::Allow(ReadAccess::OwnData));
        }

        let other = actor("pat-2", Role::Patient, Some("h-1"));
        let decision = authz.decide_read(&other, &record("h-1", None), Utc::now()).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::NotOwnData));
    }

    #[tokio::test]
    async fn test_patients_never_write() {
        let (authz, _) = authorizer(vec![]);
        let patient = actor("pat-1", Role::Patient, Some("h-1"));
        for action in [WriteAction::Create, WriteAction::Update] {
            let decision = authz
                .decide_write(&patient, &record("h-1", Some("pat-1")), action, Utc::now())
                .await
                .unwrap();
            assert_eq!(decision, Decision::Deny(DenyReason::InsufficientRole));
        }
    }

    #[tokio::test]
    async fn test_same_tenant_staff_read() {
        let (authz, _) = authorizer(vec![]);
        for role in [Role::HospitalAdmin, Role::Doctor, Role::Nurse] {
            let staff = actor("s-1", role, Some("h-1"));
            let decision = authz.decide_read(&staff, &record("h-1", None), Utc::now()).await.unwrap();
            assert_eq!(decision, Decision::Allow(ReadAccess::SameTenant));
        }
    }

    #[tokio::test]
    async fn test_department_staff_denied_even_same_hospital() {
        let (authz, _) = authorizer(vec![]);
        let staff = actor("lab-1", Role::DepartmentStaff, Some("h-1"));
        let decision = authz.decide_read(&staff, &record("h-1", None), Utc::now()).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::DepartmentStaffRecordAccess));
    }

    #[tokio::test]
    async fn test_cross_tenant_requires_grant_and_is_directional() {
        let (authz, _) = authorizer(vec![grant("h-1", "h-2")]);
        let doc_h1 = actor("doc-1", Role::Doctor, Some("h-1"));
        let doc_h2 = actor("doc-2", Role::Doctor, Some("h-2"));

        let decision = authz.decide_read(&doc_h1, &record("h-2", None), Utc::now()).await.unwrap();
        assert!(matches!(decision, Decision::Allow(ReadAccess::Sharing { .. })));

        let decision = authz.decide_read(&doc_h2, &record("h-1", None), Utc::now()).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::OtherTenant));
    }

    #[tokio::test]
    async fn test_grant_never_confers_write() {
        let (authz, _) = authorizer(vec![grant("h-1", "h-2")]);
        let doc = actor("doc-1", Role::Doctor, Some("h-1"));
        let target = Target {
            kind: ResourceKind::Prescription,
            ..record("h-2", Some("doc-1"))
        };
        for action in [WriteAction::Create, WriteAction::Update] {
            let decision = authz.decide_write(&doc, &target, action, Utc::now()).await.unwrap();
            assert_eq!(decision, Decision::Deny(DenyReason::SharingReadOnly));
        }
    }

    #[tokio::test]
    async fn test_expired_grant_denies() {
        let mut expired = grant("h-1", "h-2");
        let now = Utc::now();
        expired.expires_at = Some(now + Duration::minutes(5));
        let (authz, _) = authorizer(vec![expired]);
        let doc = actor("doc-1", Role::Doctor, Some("h-1"));

        let before = authz.decide_read(&doc, &record("h-2", None), now).await.unwrap();
        assert!(matches!(before, Decision::Allow(_)));
        let after = authz
            .decide_read(&doc, &record("h-2", None), now + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(after, Decision::Deny(DenyReason::OtherTenant));
    }

    #[tokio::test]
    async fn test_grant_flags_and_scope() {
        let mut limited = grant("h-1", "h-2");
        limited.scope = SharingScope::Limited;
        limited.patient_ids = vec!["pat-1".to_string()];
        limited.permissions.view_prescriptions = false;
        limited.permissions.view_diagnosis = false;
        let (authz, _) = authorizer(vec![limited]);
        let doc = actor("doc-1", Role::Doctor, Some("h-1"));
        let now = Utc::now();

        let decision = authz.decide_read(&doc, &record("h-2", None), now).await.unwrap();
        match decision {
            Decision::Allow(access) => assert!(access.redact_diagnosis()),
            other => panic!("expected allow, got {:?}", other),
        }

        let prescription = Target {
            kind: ResourceKind::Prescription,
            ..record("h-2", None)
        };
        let decision = authz.decide_read(&doc, &prescription, now).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::SharingPermissionDenied));

        let other_patient = Target {
            patient_id: "pat-2",
            ..record("h-2", None)
        };
        let decision = authz.decide_read(&doc, &other_patient, now).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::PatientOutOfScope));
    }

    #[tokio::test]
    async fn test_update_requires_author_or_admin() {
        let (authz, _) = authorizer(vec![]);
        let target = record("h-1", Some("doc-1"));
        let now = Utc::now();

        let author = actor("doc-1", Role::Doctor, Some("h-1"));
        let colleague = actor("doc-2", Role::Doctor, Some("h-1"));
        let admin = actor("adm-1", Role::HospitalAdmin, Some("h-1"));

        assert_eq!(
            authz.decide_write(&author, &target, WriteAction::Update, now).await.unwrap(),
            Decision::Allow(())
        );
        assert_eq!(
            authz.decide_write(&colleague, &target, WriteAction::Update, now).await.unwrap(),
            Decision::Deny(DenyReason::NotAuthor)
        );
        assert_eq!(
            authz.decide_write(&admin, &target, WriteAction::Update, now).await.unwrap(),
            Decision::Allow(())
        );
    }

    #[tokio::test]
    async fn test_create_requires_author_role() {
        let (authz, _) = authorizer(vec![]);
        let now = Utc::now();
        let nurse = actor("n-1", Role::Nurse, Some("h-1"));
        let admin = actor("adm-1", Role::HospitalAdmin, Some("h-1"));

        assert_eq!(
            authz.decide_write(&nurse, &record("h-1", None), WriteAction::Create, now).await.unwrap(),
            Decision::Allow(())
        );
        let prescription = Target {
            kind: ResourceKind::Prescription,
            ..record("h-1", None)
        };
        assert_eq!(
            authz.decide_write(&nurse, &prescription, WriteAction::Create, now).await.unwrap(),
            Decision::Deny(DenyReason::InsufficientRole)
        );
        assert_eq!(
            authz.decide_write(&admin, &record("h-1", None), WriteAction::Create, now).await.unwrap(),
            Decision::Deny(DenyReason::InsufficientRole)
        );
    }

    #[tokio::test]
    async fn test_authorize_read_audits_and_counts_usage() {
        let (authz, sink) = authorizer(vec![grant("h-1", "h-2")]);
        let doc = actor("doc-1", Role::Doctor, Some("h-1"));
        let now = Utc::now();

        authz.authorize_read(&doc, &record("h-2", None), now).await.unwrap();
        let err = authz
            .authorize_read(&actor("lab", Role::DepartmentStaff, Some("h-2")), &record("h-2", None), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "department_staff_record_access");

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Allowed);
        assert_eq!(events[0].detail.as_deref(), Some("sharing:h-1->h-2"));
        assert_eq!(events[1].outcome, AuditOutcome::Denied);
        assert_eq!(*authz.grants.accesses.lock().await, 1);
    }

    #[test]
    fn test_unaffiliated_patient_has_no_owning_hospital() {
        let patient = actor("p-1", Role::Patient, Some("h-1"));
        assert_eq!(owning_hospital(&patient).unwrap(), "h-1");

        let drifter = actor("p-2", Role::Patient, None);
        let err = owning_hospital(&drifter).unwrap_err();
        assert_eq!(err.code(), "no_hospital_affiliation");

        let blank = actor("p-3", Role::Patient, Some(""));
        assert_eq!(owning_hospital(&blank).unwrap_err().code(), "no_hospital_affiliation");
    }
}
