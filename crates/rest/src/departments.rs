//! Department management within a hospital.

use std::sync::Arc;

use carenet_persistence::{DocumentStore, UniqueKey};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::department::normalize_code;
use crate::domain::{
    Department, DepartmentService, DepartmentType, OperatingHours, Role, User, new_id,
};
use crate::error::{ConflictKind, DenyReason, RestError, RestResult};
use crate::identity::SessionService;
use crate::repository::{Repository, query};

/// Credentials for a department's shared login.
#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentLogin {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
    /// Display name; defaults to the department name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Department creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDepartment {
    /// Display name.
    pub name: String,
    /// Code, unique within the hospital.
    pub code: String,
    /// Kind of department.
    #[serde(default)]
    pub department_type: DepartmentType,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Offered services.
    #[serde(default)]
    pub services: Vec<DepartmentService>,
    /// Weekly opening hours.
    #[serde(default)]
    pub operating_hours: Vec<OperatingHours>,
    /// Optional department login to provision.
    #[serde(default)]
    pub login: Option<DepartmentLogin>,
}

/// Department update. The code is immutable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepartmentUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New type.
    #[serde(default)]
    pub department_type: Option<DepartmentType>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement service list.
    #[serde(default)]
    pub services: Option<Vec<DepartmentService>>,
    /// Replacement opening hours.
    #[serde(default)]
    pub operating_hours: Option<Vec<OperatingHours>>,
}

fn code_key(hospital_id: &str, code: &str) -> UniqueKey {
    UniqueKey::compound("departments.code", &[hospital_id, code])
}

fn validate_services(services: &[DepartmentService]) -> RestResult<()> {
    for service in services {
        if service.name.trim().is_empty() {
            return Err(RestError::validation("Service names cannot be empty"));
        }
        if !service.price.is_finite() || service.price < 0.0 {
            return Err(RestError::validation(format!(
                "Service '{}' has an invalid price",
                service.name
            )));
        }
    }
    Ok(())
}

/// Returns the hospital the actor administers.
fn administered_hospital(actor: &User) -> RestResult<&str> {
    if actor.role != Role::HospitalAdmin {
        return Err(RestError::forbidden(DenyReason::InsufficientRole));
    }
    actor
        .hospital_id
        .as_deref()
        .ok_or(RestError::forbidden(DenyReason::NoHospitalAffiliation))
}

/// Department operations.
pub struct Departments<S> {
    repo: Repository<S>,
    sessions: SessionService<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S: DocumentStore> Departments<S> {
    /// Creates the service.
    pub fn new(repo: Repository<S>, sessions: SessionService<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repo,
            sessions,
            audit,
        }
    }

    async fn audit(&self, actor: &User, action: &str, id: &str, now: DateTime<Utc>) {
        self.audit
            .record(AuditEvent::new(
                &actor.id,
                action,
                "department",
                id,
                AuditOutcome::Succeeded,
                now,
            ))
            .await;
    }

    /// Creates a department in the actor's hospital, optionally with its
    /// own department-staff login.
    pub async fn create(
        &self,
        actor: &User,
        request: CreateDepartment,
        now: DateTime<Utc>,
    ) -> RestResult<Department> {
        let hospital_id = administered_hospital(actor)?.to_string();
        let code = normalize_code(&request.code);
        if request.name.trim().is_empty() || code.is_empty() {
            return Err(RestError::validation("Department name and code are required"));
        }
        validate_services(&request.services)?;
        if let Some(login) = &request.login {
            self.sessions.ensure_email_free(&login.email).await?;
        }

        let department = Department {
            id: new_id(),
            hospital_id: hospital_id.clone(),
            name: request.name.trim().to_string(),
            code: code.clone(),
            department_type: request.department_type,
            description: request.description,
            services: request.services,
            operating_hours: request.operating_hours,
            login_user_id: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let mut department = self
            .repo
            .insert(department, vec![code_key(&hospital_id, &code)])
            .await
            .map_err(|e| match e {
                RestError::Duplicate { .. } => RestError::Duplicate {
                    message: format!("Department code {} is already used in this hospital", code),
                },
                other => other,
            })?;

        if let Some(login) = request.login {
            let mut user = User::new(
                new_id(),
                &login.email,
                String::new(),
                login.name.unwrap_or_else(|| department.value.name.clone()),
                Role::DepartmentStaff,
                now,
            );
            user.hospital_id = Some(hospital_id.clone());
            user.department_id = Some(department.value.id.clone());
            let user = match self.sessions.provision(user, &login.password).await {
                Ok(user) => user,
                Err(e) => {
                    if let Err(cleanup) = self.repo.remove::<Department>(&department.value.id).await {
                        warn!(department_id = %department.value.id, error = %cleanup, "Failed to roll back department");
                    }
                    return Err(e);
                }
            };
            department.value.login_user_id = Some(user.id);
            department = self.repo.save(department).await?;
        }

        let department = department.into_inner();
        info!(department_id = %department.id, hospital_id = %hospital_id, code = %code, "Department created");
        self.audit(actor, "department.create", &department.id, now).await;
        Ok(department)
    }

    /// Reads a department.
    pub async fn get(&self, id: &str) -> RestResult<Department> {
        Ok(self.repo.get::<Department>(id).await?.into_inner())
    }

    /// Lists active departments of a hospital.
    pub async fn list(&self, hospital_id: &str) -> RestResult<Vec<Department>> {
        self.repo
            .list(
                &query::<Department>()
                    .with_eq("hospital_id", hospital_id)
                    .with_eq("active", true),
            )
            .await
    }

    /// Updates a department of the actor's hospital.
    pub async fn update(
        &self,
        actor: &User,
        id: &str,
        update: DepartmentUpdate,
        now: DateTime<Utc>,
    ) -> RestResult<Department> {
        let hospital_id = administered_hospital(actor)?;
        let mut department = self.repo.get::<Department>(id).await?;
        if department.value.hospital_id != hospital_id {
            return Err(RestError::forbidden(DenyReason::OtherTenant));
        }
        let d = &mut department.value;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(RestError::validation("Department name cannot be empty"));
            }
            d.name = name.trim().to_string();
        }
        if let Some(department_type) = update.department_type {
            d.department_type = department_type;
        }
        if update.description.is_some() {
            d.description = update.description;
        }
        if let Some(services) = update.services {
            validate_services(&services)?;
            d.services = services;
        }
        if let Some(hours) = update.operating_hours {
            d.operating_hours = hours;
        }
        d.updated_at = now;
        let department = self.repo.save(department).await?.into_inner();
        self.audit(actor, "department.update", id, now).await;
        Ok(department)
    }

    /// Soft-deletes a department. Refused while any active user is
    /// assigned to it.
    pub async fn delete(&self, actor: &User, id: &str, now: DateTime<Utc>) -> RestResult<()> {
        let hospital_id = administered_hospital(actor)?;
        let mut department = self.repo.get::<Department>(id).await?;
        if department.value.hospital_id != hospital_id {
            return Err(RestError::forbidden(DenyReason::OtherTenant));
        }
        let staff = self
            .repo
            .count(
                &query::<User>()
                    .with_eq("department_id", id)
                    .with_eq("active", true),
            )
            .await?;
        if staff > 0 {
            return Err(RestError::conflict(
                ConflictKind::DepartmentHasStaff,
                format!("Department {} still has {} active staff", id, staff),
            ));
        }
        department.value.active = false;
        department.value.updated_at = now;
        self.repo.save(department).await?;
        info!(department_id = %id, "Department deactivated");
        self.audit(actor, "department.delete", id, now).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::identity::TokenService;
    use carenet_persistence::backends::sqlite::SqliteBackend;
    use chrono::Duration;

    fn service() -> Departments<SqliteBackend> {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        let repo = Repository::new(Arc::new(backend));
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let tokens = TokenService::new(
            b"departments-test-secret-departments".to_vec(),
            Duration::minutes(15),
            Duration::days(1),
        );
        let sessions = SessionService::new(repo.clone(), tokens, Arc::clone(&audit), 1_000);
        Departments::new(repo, sessions, audit)
    }

    fn admin(hospital: &str) -> User {
        let mut user = User::new(
            format!("admin-{}", hospital),
            &format!("admin@{}.org", hospital),
            String::new(),
            "Admin".to_string(),
            Role::HospitalAdmin,
            Utc::now(),
        );
        user.hospital_id = Some(hospital.to_string());
        user
    }

    fn lab(login: Option<DepartmentLogin>) -> CreateDepartment {
        CreateDepartment {
            name: "Laboratory".to_string(),
            code: " lab ".to_string(),
            department_type: DepartmentType::Laboratory,
            description: None,
            services: vec![],
            operating_hours: vec![],
            login,
        }
    }

    #[tokio::test]
    async fn test_code_unique_per_hospital() {
        let svc = service();
        let now = Utc::now();
        let dept = svc.create(&admin("h1"), lab(None), now).await.unwrap();
        assert_eq!(dept.code, "LAB");

        let err = svc.create(&admin("h1"), lab(None), now).await.unwrap_err();
        assert_eq!(err.category(), "duplicate");

        svc.create(&admin("h2"), lab(None), now).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_blocks_delete_until_deactivated() {
        let svc = service();
        let now = Utc::now();
        let login = DepartmentLogin {
            email: "lab@h1.org".to_string(),
            password: "lab-password".to_string(),
            name: None,
        };
        let dept = svc.create(&admin("h1"), lab(Some(login)), now).await.unwrap();
        let login_id = dept.login_user_id.clone().unwrap();

        let err = svc.delete(&admin("h1"), &dept.id, now).await.unwrap_err();
        assert_eq!(err.code(), "department_has_staff");

        let mut user = svc.repo.get::<User>(&login_id).await.unwrap();
        assert_eq!(user.value.role, Role::DepartmentStaff);
        user.value.active = false;
        svc.repo.save(user).await.unwrap();

        svc.delete(&admin("h1"), &dept.id, now).await.unwrap();
        assert!(svc.list("h1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_hospital_admin_cannot_update() {
        let svc = service();
        let now = Utc::now();
        let dept = svc.create(&admin("h1"), lab(None), now).await.unwrap();
        let err = svc
            .update(&admin("h2"), &dept.id, DepartmentUpdate::default(), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "other_tenant");
    }
}
