//! User approval lifecycle and staff-facing user lookups.
//!
//! Staff who self-register sit in `pending_approval` until a hospital admin
//! of their hospital (or a super admin) approves them, which promotes the
//! requested role.

use std::sync::Arc;

use carenet_persistence::DocumentStore;
use carenet_persistence::types::{Pagination, SortOrder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{ApprovalStatus, Role, User};
use crate::error::{ConflictKind, DenyReason, RestError, RestResult};
use crate::repository::{Repository, Versioned, query};

/// Filters for listing users.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    /// Only users with this role.
    #[serde(default)]
    pub role: Option<Role>,
}

/// User administration.
pub struct UserAdmin<S> {
    repo: Repository<S>,
    audit: Arc<dyn AuditSink>,
}

fn require_admin(actor: &User) -> RestResult<()> {
    match actor.role {
        Role::SuperAdmin | Role::HospitalAdmin => Ok(()),
        _ => Err(RestError::forbidden(DenyReason::InsufficientRole)),
    }
}

/// Hospital admins may only manage users of their own hospital.
fn require_same_hospital(actor: &User, user: &User) -> RestResult<()> {
    if actor.role == Role::HospitalAdmin && actor.hospital_id != user.hospital_id {
        return Err(RestError::forbidden(DenyReason::OtherTenant));
    }
    Ok(())
}

impl<S: DocumentStore> UserAdmin<S> {
    /// Creates the service.
    pub fn new(repo: Repository<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, audit }
    }

    async fn audit(
        &self,
        actor: &User,
        action: &str,
        user_id: &str,
        outcome: AuditOutcome,
        now: DateTime<Utc>,
    ) {
        self.audit
            .record(AuditEvent::new(&actor.id, action, "user", user_id, outcome, now))
            .await;
    }

    /// Users awaiting approval, restricted to the admin's hospital.
    pub async fn pending(&self, actor: &User) -> RestResult<Vec<User>> {
        require_admin(actor)?;
        let mut q = query::<User>().with_eq("approval_status", "pending");
        if actor.role == Role::HospitalAdmin {
            q = q.with_eq("hospital_id", actor.hospital_id.clone());
        }
        self.repo.list(&q).await
    }

    async fn load_pending(
        &self,
        actor: &User,
        id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> RestResult<Versioned<User>> {
        require_admin(actor)?;
        let user = self.repo.get::<User>(id).await?;
        require_same_hospital(actor, &user.value)?;
        if !user.value.is_pending() {
            self.audit(actor, action, id, AuditOutcome::Rejected, now).await;
            return Err(RestError::conflict(
                ConflictKind::NotPending,
                format!("User {} is not pending approval", id),
            ));
        }
        Ok(user)
    }

    /// Approves a pending user and promotes the requested role.
    pub async fn approve(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<User> {
        let mut user = self.load_pending(actor, id, "user.approve", now).await?;
        let u = &mut user.value;
        let role = u
            .requested_role
            .ok_or_else(|| RestError::validation_code("no_requested_role", "The user did not request a role"))?;
        if u.hospital_id.is_none() {
            return Err(RestError::validation_code(
                "hospital_required",
                "Staff must be affiliated with a hospital before approval",
            ));
        }
        if role == Role::DepartmentStaff && u.department_id.is_none() {
            return Err(RestError::validation_code(
                "department_required",
                "Department staff must be assigned to a department before approval",
            ));
        }
        u.role = role;
        u.requested_role = None;
        u.approval_status = ApprovalStatus::Approved;
        u.reviewed_by = Some(actor.id.clone());
        u.reviewed_at = Some(now);
        u.updated_at = now;
        let user = self.repo.save(user).await?.into_inner();

        info!(user_id = %id, role = %user.role, approved_by = %actor.id, "User approved");
        self.audit(actor, "user.approve", id, AuditOutcome::Succeeded, now).await;
        Ok(user)
    }

    /// Rejects a pending user. Rejected users cannot sign in.
    pub async fn reject(
        &self,
        actor: &User,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> RestResult<User> {
        let mut user = self.load_pending(actor, id, "user.reject", now).await?;
        let u = &mut user.value;
        u.approval_status = ApprovalStatus::Rejected;
        u.rejection_reason = reason;
        u.reviewed_by = Some(actor.id.clone());
        u.reviewed_at = Some(now);
        u.refresh_token_id = None;
        u.updated_at = now;
        let user = self.repo.save(user).await?.into_inner();

        info!(user_id = %id, rejected_by = %actor.id, "User rejected");
        self.audit(actor, "user.reject", id, AuditOutcome::Succeeded, now).await;
        Ok(user)
    }

    /// Deactivates a user and revokes their refresh token.
    pub async fn deactivate(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<()> {
        require_admin(actor)?;
        if actor.id == id {
            return Err(RestError::validation_code(
                "self_deactivation",
                "You cannot deactivate your own account",
            ));
        }
        let mut user = self.repo.get::<User>(id).await?;
        require_same_hospital(actor, &user.value)?;
        if user.value.role == Role::SuperAdmin {
            return Err(RestError::forbidden(DenyReason::InsufficientRole));
        }
        user.value.active = false;
        user.value.refresh_token_id = None;
        user.value.updated_at = now;
        self.repo.save(user).await?;

        warn!(user_id = %id, deactivated_by = %actor.id, "User deactivated");
        self.audit(actor, "user.deactivate", id, AuditOutcome::Succeeded, now).await;
        Ok(())
    }

    /// Reads a user. Allowed for the user themself, admins of their
    /// hospital, super admins, and clinical staff looking up a patient of
    /// their hospital.
    pub async fn get(&self, actor: &User, id: &str) -> RestResult<User> {
        let user = self.repo.get::<User>(id).await?.into_inner();
        let same_hospital = actor.hospital_id.is_some() && actor.hospital_id == user.hospital_id;
        let allowed = actor.id == user.id
            || actor.role == Role::SuperAdmin
            || (actor.role == Role::HospitalAdmin && same_hospital)
            || (actor.role.is_clinical_reader() && same_hospital && user.role == Role::Patient);
        if !allowed {
            return Err(RestError::forbidden(if same_hospital {
                DenyReason::InsufficientRole
            } else {
                DenyReason::OtherTenant
            }));
        }
        Ok(user)
    }

    /// Lists users, restricted to the admin's hospital.
    pub async fn list(
        &self,
        actor: &User,
        filter: UserFilter,
        pagination: Pagination,
    ) -> RestResult<Vec<User>> {
        require_admin(actor)?;
        let mut q = query::<User>()
            .with_sort(SortOrder::CreatedDesc)
            .with_pagination(pagination);
        if actor.role == Role::HospitalAdmin {
            q = q.with_eq("hospital_id", actor.hospital_id.clone());
        }
        if let Some(role) = filter.role {
            q = q.with_eq("role", role.as_str());
        }
        self.repo.list(&q).await
    }

    /// Case-insensitive substring search over name, email and phone of the
    /// active patients registered at the actor's hospital.
    pub async fn search_patients(
        &self,
        actor: &User,
        term: &str,
        pagination: Pagination,
    ) -> RestResult<Vec<User>> {
        if !actor.role.is_clinical_reader() {
            return Err(RestError::forbidden(DenyReason::InsufficientRole));
        }
        let hospital_id = actor
            .hospital_id
            .as_deref()
            .ok_or(RestError::forbidden(DenyReason::NoHospitalAffiliation))?;
        let term = term.trim();
        if term.is_empty() {
            return Err(RestError::validation("A search term is required"));
        }
        let q = query::<User>()
            .with_eq("role", "patient")
            .with_eq("hospital_id", hospital_id)
            .with_eq("active", true)
            .with_contains(vec!["name", "email", "phone"], term)
            .with_pagination(pagination);
        self.repo.list(&q).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use carenet_persistence::backends::sqlite::SqliteBackend;

    fn service() -> UserAdmin<SqliteBackend> {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        UserAdmin::new(
            Repository::new(Arc::new(backend)),
            Arc::new(MemoryAuditSink::new()),
        )
    }

    fn user(id: &str, role: Role, hospital: &str) -> User {
        let mut user = User::new(
            id.to_string(),
            &format!("{}@example.org", id),
            String::new(),
            id.to_string(),
            role,
            Utc::now(),
        );
        user.hospital_id = Some(hospital.to_string());
        user
    }

    fn pending(id: &str, requested: Role, hospital: &str) -> User {
        let mut user = user(id, Role::PendingApproval, hospital);
        user.requested_role = Some(requested);
        user.approval_status = ApprovalStatus::Pending;
        user
    }

    #[tokio::test]
    async fn test_approve_promotes_requested_role() {
        let svc = service();
        let now = Utc::now();
        svc.repo.insert(pending("doc", Role::Doctor, "h1"), vec![]).await.unwrap();

        let approved = svc.approve(&user("adm", Role::HospitalAdmin, "h1"), "doc", now).await.unwrap();
        assert_eq!(approved.role, Role::Doctor);
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);

        let err = svc
            .approve(&user("adm", Role::HospitalAdmin, "h1"), "doc", now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_pending");
    }

    #[tokio::test]
    async fn test_admin_of_other_hospital_cannot_approve() {
        let svc = service();
        svc.repo.insert(pending("nurse", Role::Nurse, "h1"), vec![]).await.unwrap();
        let err = svc
            .approve(&user("adm", Role::HospitalAdmin, "h2"), "nurse", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "other_tenant");
    }

    #[tokio::test]
    async fn test_department_staff_needs_department() {
        let svc = service();
        svc.repo
            .insert(pending("lab", Role::DepartmentStaff, "h1"), vec![])
            .await
            .unwrap();
        let err = svc
            .approve(&user("root", Role::SuperAdmin, "h0"), "lab", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "department_required");
    }

    #[tokio::test]
    async fn test_rejected_user_cannot_sign_in() {
        let svc = service();
        svc.repo.insert(pending("doc", Role::Doctor, "h1"), vec![]).await.unwrap();
        let rejected = svc
            .reject(&user("adm", Role::HospitalAdmin, "h1"), "doc", Some("unverified".into()), Utc::now())
            .await
            .unwrap();
        assert!(!rejected.can_sign_in());
    }

    #[tokio::test]
    async fn test_patient_search_is_tenant_scoped() {
        let svc = service();
        let mut ada = user("ada", Role::Patient, "h1");
        ada.name = "Ada Lovelace".to_string();
        ada.phone = Some("555-0100".to_string());
        let mut other = user("ada2", Role::Patient, "h2");
        other.name = "Ada Byron".to_string();
        svc.repo.insert(ada, vec![]).await.unwrap();
        svc.repo.insert(other, vec![]).await.unwrap();

        let doctor = user("doc", Role::Doctor, "h1");
        let found = svc.search_patients(&doctor, "LOVE", Pagination::new(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        let found = svc.search_patients(&doctor, "0100", Pagination::new(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        let found = svc.search_patients(&doctor, "byron", Pagination::new(10)).await.unwrap();
        assert!(found.is_empty());

        let lab = user("lab", Role::DepartmentStaff, "h1");
        assert!(svc.search_patients(&lab, "ada", Pagination::new(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_cannot_deactivate_self() {
        let svc = service();
        let admin = user("adm", Role::HospitalAdmin, "h1");
        svc.repo.insert(admin.clone(), vec![]).await.unwrap();
        let err = svc.deactivate(&admin, "adm", Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "self_deactivation");
    }
}
