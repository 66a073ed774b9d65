//! Tenant Directory: hospital registration, review and subscription.
//!
//! A hospital is *usable* when it is approved, active and its subscription
//! is active at the moment of the check. Subscription expiry is derived on
//! read; [`Directory::get`] persists a derived expiry best-effort so stored
//! state catches up with reality without a background sweep.

use std::sync::Arc;

use carenet_persistence::types::Pagination;
use carenet_persistence::{DocumentStore, UniqueKey};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{
    ApprovalStatus, Department, Hospital, HospitalFeatures, HospitalStats, Role, Subscription,
    SubscriptionPlan, SubscriptionStatus, User, UserView, new_id,
};
use crate::error::{ConflictKind, DenyReason, RestError, RestResult};
use crate::identity::SessionService;
use crate::identity::session::{validate_credentials, validate_email};
use crate::repository::{Repository, Versioned, query};

/// Admin account created together with a hospital.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminAccount {
    /// Admin display name.
    pub name: String,
    /// Admin login email.
    pub email: String,
    /// Admin password.
    pub password: String,
    /// Admin phone number.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Hospital registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterHospital {
    /// Hospital name, unique case-insensitively.
    pub name: String,
    /// Registration number, unique.
    pub registration_number: String,
    /// Contact email, unique.
    pub email: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Requested plan.
    #[serde(default)]
    pub plan: SubscriptionPlan,
    /// The hospital's first admin.
    pub admin: AdminAccount,
}

/// Result of a hospital registration.
#[derive(Debug, Clone, Serialize)]
pub struct HospitalRegistration {
    /// The pending hospital.
    pub hospital: Hospital,
    /// Its admin.
    pub admin: UserView,
}

/// Subscription renewal (simulated payment).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenewSubscription {
    /// New plan; keeps the current one when absent.
    #[serde(default)]
    pub plan: Option<SubscriptionPlan>,
}

/// Partial feature-flag update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureUpdate {
    /// Cross-hospital sharing.
    #[serde(default)]
    pub cross_hospital_sharing: Option<bool>,
    /// Telemedicine.
    #[serde(default)]
    pub telemedicine: Option<bool>,
    /// Online payments.
    #[serde(default)]
    pub online_payments: Option<bool>,
    /// Laboratory integration.
    #[serde(default)]
    pub lab_integration: Option<bool>,
}

/// A reviewer's reason.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasonBody {
    /// Free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

const STAFF_ROLES: [&str; 4] = ["hospital_admin", "doctor", "nurse", "department_staff"];

fn hospital_keys(hospital: &Hospital) -> Vec<UniqueKey> {
    vec![
        UniqueKey::new("hospitals.name", hospital.name.to_lowercase()),
        UniqueKey::new(
            "hospitals.registration_number",
            hospital.registration_number.to_lowercase(),
        ),
        UniqueKey::new("hospitals.email", hospital.email.to_lowercase()),
    ]
}

/// Hospital operations.
pub struct Directory<S> {
    repo: Repository<S>,
    sessions: SessionService<S>,
    audit: Arc<dyn AuditSink>,
    subscription_days: u32,
}

impl<S: DocumentStore> Directory<S> {
    /// Creates the directory.
    pub fn new(
        repo: Repository<S>,
        sessions: SessionService<S>,
        audit: Arc<dyn AuditSink>,
        subscription_days: u32,
    ) -> Self {
        Self {
            repo,
            sessions,
            audit,
            subscription_days,
        }
    }

    fn term(&self) -> Duration {
        Duration::days(i64::from(self.subscription_days))
    }

    async fn audit(
        &self,
        actor_id: &str,
        action: &str,
        hospital_id: &str,
        outcome: AuditOutcome,
        now: DateTime<Utc>,
    ) {
        self.audit
            .record(AuditEvent::new(actor_id, action, "hospital", hospital_id, outcome, now))
            .await;
    }

    /// Registers a pending hospital together with its admin user.
    pub async fn register(
        &self,
        request: RegisterHospital,
        now: DateTime<Utc>,
    ) -> RestResult<HospitalRegistration> {
        let name = request.name.trim().to_string();
        let registration_number = request.registration_number.trim().to_string();
        if name.is_empty() || registration_number.is_empty() {
            return Err(RestError::validation(
                "Hospital name and registration number are required",
            ));
        }
        if request.admin.name.trim().is_empty() {
            return Err(RestError::validation("Admin name is required"));
        }
        validate_email(&request.email)?;
        validate_credentials(&request.admin.email, &request.admin.password)?;
        self.sessions.ensure_email_free(&request.admin.email).await?;

        let admin_id = new_id();
        let hospital = Hospital {
            id: new_id(),
            name,
            registration_number,
            email: request.email.trim().to_lowercase(),
            phone: request.phone,
            address: request.address,
            approval_status: ApprovalStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            subscription: Subscription::pending(request.plan),
            features: HospitalFeatures::default(),
            stats: HospitalStats::default(),
            admin_user_id: admin_id.clone(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let keys = hospital_keys(&hospital);
        let hospital = self.repo.insert(hospital, keys).await?.into_inner();

        let mut admin = User::new(
            admin_id,
            &request.admin.email,
            String::new(),
            request.admin.name.trim().to_string(),
            Role::HospitalAdmin,
            now,
        );
        admin.phone = request.admin.phone;
        admin.hospital_id = Some(hospital.id.clone());
        let admin = match self.sessions.provision(admin, &request.admin.password).await {
            Ok(admin) => admin,
            Err(e) => {
                if let Err(cleanup) = self.repo.remove::<Hospital>(&hospital.id).await {
                    warn!(hospital_id = %hospital.id, error = %cleanup, "Failed to roll back hospital registration");
                }
                return Err(e);
            }
        };

        info!(hospital_id = %hospital.id, admin_id = %admin.id, "Hospital registered");
        self.audit(&admin.id, "hospital.register", &hospital.id, AuditOutcome::Succeeded, now)
            .await;
        Ok(HospitalRegistration {
            hospital,
            admin: UserView::from(&admin),
        })
    }

    /// Reads a hospital, persisting a derived subscription expiry.
    pub async fn get(&self, id: &str, now: DateTime<Utc>) -> RestResult<Hospital> {
        let mut hospital = self.repo.get::<Hospital>(id).await?;
        let effective = hospital.value.subscription.effective_status(now);
        if effective != hospital.value.subscription.status {
            hospital.value.subscription.status = effective;
            hospital.value.updated_at = now;
            let snapshot = hospital.value.clone();
            match self.repo.save(hospital).await {
                Ok(saved) => return Ok(saved.into_inner()),
                Err(e) => {
                    debug!(hospital_id = %id, error = %e, "Skipped persisting subscription expiry");
                    return Ok(snapshot);
                }
            }
        }
        Ok(hospital.into_inner())
    }

    /// True when the hospital exists and is usable at `now`.
    pub async fn is_usable(&self, id: &str, now: DateTime<Utc>) -> RestResult<bool> {
        hospital_usable(&self.repo, id, now).await
    }

    /// True when the department is active and its hospital is usable.
    pub async fn is_operational(&self, department: &Department, now: DateTime<Utc>) -> RestResult<bool> {
        department_operational(&self.repo, department, now).await
    }

    /// Lists hospitals usable at `now` (public directory).
    ///
    /// Stored subscription status is filtered in the query; a term that
    /// lapsed without being written back is dropped afterwards.
    pub async fn list_usable(
        &self,
        pagination: Pagination,
        now: DateTime<Utc>,
    ) -> RestResult<Vec<Hospital>> {
        let q = query::<Hospital>()
            .with_eq("approval_status", "approved")
            .with_eq("active", true)
            .with_eq("subscription.status", "active")
            .with_pagination(pagination);
        let mut hospitals: Vec<Hospital> = self.repo.list(&q).await?;
        hospitals.retain(|h| h.is_usable(now));
        Ok(hospitals)
    }

    /// Lists hospitals awaiting review.
    pub async fn list_pending(&self, actor: &User) -> RestResult<Vec<Hospital>> {
        require_super_admin(actor)?;
        self.repo
            .list(&query::<Hospital>().with_eq("approval_status", "pending"))
            .await
    }

    async fn pending(&self, actor: &User, id: &str, action: &str, now: DateTime<Utc>) -> RestResult<Versioned<Hospital>> {
        require_super_admin(actor)?;
        let hospital = self.repo.get::<Hospital>(id).await?;
        if hospital.value.approval_status != ApprovalStatus::Pending {
            self.audit(&actor.id, action, id, AuditOutcome::Rejected, now).await;
            return Err(RestError::conflict(
                ConflictKind::NotPending,
                format!("Hospital {} is not pending review", id),
            ));
        }
        Ok(hospital)
    }

    /// Approves a pending hospital and activates its subscription.
    pub async fn approve(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<Hospital> {
        let mut hospital = self.pending(actor, id, "hospital.approve", now).await?;
        let h = &mut hospital.value;
        h.approval_status = ApprovalStatus::Approved;
        h.reviewed_by = Some(actor.id.clone());
        h.reviewed_at = Some(now);
        h.subscription.status = SubscriptionStatus::Active;
        h.subscription.started_at = Some(now);
        h.subscription.expires_at = Some(now + self.term());
        h.updated_at = now;
        let hospital = self.repo.save(hospital).await?.into_inner();

        info!(hospital_id = %id, approved_by = %actor.id, "Hospital approved");
        self.audit(&actor.id, "hospital.approve", id, AuditOutcome::Succeeded, now)
            .await;
        Ok(hospital)
    }

    /// Rejects a pending hospital.
    pub async fn reject(
        &self,
        actor: &User,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> RestResult<Hospital> {
        let mut hospital = self.pending(actor, id, "hospital.reject", now).await?;
        let h = &mut hospital.value;
        h.approval_status = ApprovalStatus::Rejected;
        h.reviewed_by = Some(actor.id.clone());
        h.reviewed_at = Some(now);
        h.rejection_reason = reason;
        h.updated_at = now;
        let hospital = self.repo.save(hospital).await?.into_inner();

        info!(hospital_id = %id, rejected_by = %actor.id, "Hospital rejected");
        self.audit(&actor.id, "hospital.reject", id, AuditOutcome::Succeeded, now)
            .await;
        Ok(hospital)
    }

    /// Suspends an approved hospital's subscription.
    pub async fn suspend(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<Hospital> {
        require_super_admin(actor)?;
        let mut hospital = self.repo.get::<Hospital>(id).await?;
        if hospital.value.approval_status != ApprovalStatus::Approved {
            self.audit(&actor.id, "hospital.suspend", id, AuditOutcome::Rejected, now)
                .await;
            return Err(RestError::conflict(
                ConflictKind::NotApproved,
                format!("Hospital {} is not approved", id),
            ));
        }
        hospital.value.subscription.status = SubscriptionStatus::Suspended;
        hospital.value.updated_at = now;
        let hospital = self.repo.save(hospital).await?.into_inner();

        warn!(hospital_id = %id, suspended_by = %actor.id, "Hospital subscription suspended");
        self.audit(&actor.id, "hospital.suspend", id, AuditOutcome::Succeeded, now)
            .await;
        Ok(hospital)
    }

    /// Renews the subscription after a simulated payment. The term extends
    /// from the later of now and the current expiry. Only a super admin can
    /// lift a suspension.
    pub async fn renew(
        &self,
        actor: &User,
        id: &str,
        request: RenewSubscription,
        now: DateTime<Utc>,
    ) -> RestResult<Hospital> {
        require_own_hospital(actor, id)?;
        let mut hospital = self.repo.get::<Hospital>(id).await?;
        if hospital.value.approval_status != ApprovalStatus::Approved {
            return Err(RestError::conflict(
                ConflictKind::NotApproved,
                format!("Hospital {} is not approved", id),
            ));
        }
        let sub = &mut hospital.value.subscription;
        if sub.status == SubscriptionStatus::Suspended && actor.role != Role::SuperAdmin {
            self.audit(&actor.id, "hospital.renew", id, AuditOutcome::Rejected, now)
                .await;
            return Err(RestError::conflict(
                ConflictKind::InvalidState,
                "A suspended subscription can only be reinstated by the platform",
            ));
        }

        let base = match (sub.effective_status(now), sub.expires_at) {
            (SubscriptionStatus::Active, Some(expires_at)) => expires_at.max(now),
            _ => {
                sub.started_at = Some(now);
                now
            }
        };
        if let Some(plan) = request.plan {
            sub.plan = plan;
        }
        sub.status = SubscriptionStatus::Active;
        sub.expires_at = Some(base + self.term());
        sub.last_payment_reference = Some(format!("SIM-{}", new_id()));
        hospital.value.updated_at = now;
        let hospital = self.repo.save(hospital).await?.into_inner();

        info!(
            hospital_id = %id,
            plan = ?hospital.subscription.plan,
            expires_at = ?hospital.subscription.expires_at,
            "Subscription renewed"
        );
        self.audit(&actor.id, "hospital.renew", id, AuditOutcome::Succeeded, now)
            .await;
        Ok(hospital)
    }

    /// Toggles feature flags.
    pub async fn update_features(
        &self,
        actor: &User,
        id: &str,
        update: FeatureUpdate,
        now: DateTime<Utc>,
    ) -> RestResult<Hospital> {
        require_own_hospital(actor, id)?;
        let mut hospital = self.repo.get::<Hospital>(id).await?;
        let f = &mut hospital.value.features;
        if let Some(v) = update.cross_hospital_sharing {
            f.cross_hospital_sharing = v;
        }
        if let Some(v) = update.telemedicine {
            f.telemedicine = v;
        }
        if let Some(v) = update.online_payments {
            f.online_payments = v;
        }
        if let Some(v) = update.lab_integration {
            f.lab_integration = v;
        }
        hospital.value.updated_at = now;
        let hospital = self.repo.save(hospital).await?.into_inner();
        self.audit(&actor.id, "hospital.features", id, AuditOutcome::Succeeded, now)
            .await;
        Ok(hospital)
    }

    /// Recomputes and caches the hospital's counts.
    pub async fn stats(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<HospitalStats> {
        require_own_hospital(actor, id)?;
        let mut hospital = self.repo.get::<Hospital>(id).await?;
        let users = query::<User>().with_eq("hospital_id", id).with_eq("active", true);
        let stats = HospitalStats {
            staff_count: self
                .repo
                .count(&users.clone().with_in("role", STAFF_ROLES))
                .await?,
            patient_count: self.repo.count(&users.with_eq("role", "patient")).await?,
            department_count: self
                .repo
                .count(
                    &query::<Department>()
                        .with_eq("hospital_id", id)
                        .with_eq("active", true),
                )
                .await?,
            refreshed_at: Some(now),
        };
        hospital.value.stats = stats.clone();
        if let Err(e) = self.repo.save(hospital).await {
            debug!(hospital_id = %id, error = %e, "Skipped caching hospital stats");
        }
        Ok(stats)
    }
}

/// True when the hospital exists and is usable at `now`.
pub async fn hospital_usable<S: DocumentStore>(
    repo: &Repository<S>,
    id: &str,
    now: DateTime<Utc>,
) -> RestResult<bool> {
    Ok(repo
        .find::<Hospital>(id)
        .await?
        .is_some_and(|h| h.value.is_usable(now)))
}

/// True when the department is active and its hospital is usable at `now`.
pub async fn department_operational<S: DocumentStore>(
    repo: &Repository<S>,
    department: &Department,
    now: DateTime<Utc>,
) -> RestResult<bool> {
    Ok(department.active && hospital_usable(repo, &department.hospital_id, now).await?)
}

fn require_super_admin(actor: &User) -> RestResult<()> {
    if actor.role != Role::SuperAdmin {
        return Err(RestError::forbidden(DenyReason::InsufficientRole));
    }
    Ok(())
}

/// Super admins, or the admin of the hospital itself.
fn require_own_hospital(actor: &User, hospital_id: &str) -> RestResult<()> {
    match actor.role {
        Role::SuperAdmin => Ok(()),
        Role::HospitalAdmin if actor.hospital_id.as_deref() == Some(hospital_id) => Ok(()),
        Role::HospitalAdmin => Err(RestError::forbidden(DenyReason::OtherTenant)),
        _ => Err(RestError::forbidden(DenyReason::InsufficientRole)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::identity::TokenService;
    use carenet_persistence::backends::sqlite::SqliteBackend;

    fn directory() -> (Directory<SqliteBackend>, Repository<SqliteBackend>) {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        let repo = Repository::new(Arc::new(backend));
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let tokens = TokenService::new(
            b"directory-test-secret-directory-test".to_vec(),
            Duration::minutes(15),
            Duration::days(1),
        );
        let sessions = SessionService::new(repo.clone(), tokens, Arc::clone(&audit), 1_000);
        (Directory::new(repo.clone(), sessions, audit, 30), repo)
    }

    fn request(name: &str, admin_email: &str) -> RegisterHospital {
        RegisterHospital {
            name: name.to_string(),
            registration_number: format!("REG-{}", name),
            email: format!("info@{}.org", name.to_lowercase()),
            phone: None,
            address: None,
            plan: SubscriptionPlan::Standard,
            admin: AdminAccount {
                name: "Admin".to_string(),
                email: admin_email.to_string(),
                password: "correct-horse".to_string(),
                phone: None,
            },
        }
    }

    fn root() -> User {
        User::new(
            "root".to_string(),
            "root@example.org",
            String::new(),
            "Root".to_string(),
            Role::SuperAdmin,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_register_then_approve_makes_usable() {
        let (dir, _) = directory();
        let now = Utc::now();
        let reg = dir.register(request("Mercy", "admin@mercy.org"), now).await.unwrap();
        assert_eq!(reg.admin.role, Role::HospitalAdmin);
        assert!(!dir.is_usable(&reg.hospital.id, now).await.unwrap());

        let approved = dir.approve(&root(), &reg.hospital.id, now).await.unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert!(dir.is_usable(&reg.hospital.id, now).await.unwrap());
        assert!(!dir.is_usable(&reg.hospital.id, now + Duration::days(31)).await.unwrap());

        let err = dir.approve(&root(), &reg.hospital.id, now).await.unwrap_err();
        assert_eq!(err.code(), "not_pending");
    }

    #[tokio::test]
    async fn test_duplicate_admin_email_creates_no_hospital() {
        let (dir, repo) = directory();
        let now = Utc::now();
        dir.register(request("Mercy", "admin@mercy.org"), now).await.unwrap();
        let err = dir
            .register(request("Hope", "ADMIN@mercy.org"), now)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "duplicate");
        assert_eq!(repo.count(&query::<Hospital>()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_hospital_name_is_case_insensitive() {
        let (dir, _) = directory();
        let now = Utc::now();
        dir.register(request("Mercy", "a@mercy.org"), now).await.unwrap();
        let mut again = request("MERCY", "b@mercy.org");
        again.registration_number = "OTHER".to_string();
        again.email = "other@mercy.org".to_string();
        let err = dir.register(again, now).await.unwrap_err();
        assert_eq!(err.category(), "duplicate");
    }

    #[tokio::test]
    async fn test_expiry_is_persisted_on_read_and_renewal_reactivates() {
        let (dir, _) = directory();
        let now = Utc::now();
        let reg = dir.register(request("Mercy", "admin@mercy.org"), now).await.unwrap();
        dir.approve(&root(), &reg.hospital.id, now).await.unwrap();

        let later = now + Duration::days(40);
        let expired = dir.get(&reg.hospital.id, later).await.unwrap();
        assert_eq!(expired.subscription.status, SubscriptionStatus::Expired);

        let mut admin = root();
        admin.id = reg.admin.id.clone();
        admin.role = Role::HospitalAdmin;
        admin.hospital_id = Some(reg.hospital.id.clone());
        let renewed = dir
            .renew(&admin, &reg.hospital.id, RenewSubscription { plan: Some(SubscriptionPlan::Premium) }, later)
            .await
            .unwrap();
        assert_eq!(renewed.subscription.plan, SubscriptionPlan::Premium);
        assert_eq!(renewed.subscription.expires_at, Some(later + Duration::days(30)));
        assert!(renewed.subscription.last_payment_reference.unwrap().starts_with("SIM-"));
        assert!(dir.is_usable(&reg.hospital.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_suspension_needs_platform_to_lift() {
        let (dir, _) = directory();
        let now = Utc::now();
        let reg = dir.register(request("Mercy", "admin@mercy.org"), now).await.unwrap();
        dir.approve(&root(), &reg.hospital.id, now).await.unwrap();
        dir.suspend(&root(), &reg.hospital.id, now).await.unwrap();
        assert!(!dir.is_usable(&reg.hospital.id, now).await.unwrap());

        let mut admin = root();
        admin.role = Role::HospitalAdmin;
        admin.hospital_id = Some(reg.hospital.id.clone());
        let err = dir
            .renew(&admin, &reg.hospital.id, RenewSubscription::default(), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");

        dir.renew(&root(), &reg.hospital.id, RenewSubscription::default(), now)
            .await
            .unwrap();
        assert!(dir.is_usable(&reg.hospital.id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_cannot_touch_other_hospital() {
        let (dir, _) = directory();
        let now = Utc::now();
        let reg = dir.register(request("Mercy", "admin@mercy.org"), now).await.unwrap();
        let mut stranger = root();
        stranger.role = Role::HospitalAdmin;
        stranger.hospital_id = Some("elsewhere".to_string());
        let err = dir
            .update_features(&stranger, &reg.hospital.id, FeatureUpdate::default(), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "other_tenant");
    }
}
