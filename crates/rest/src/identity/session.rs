//! Registration, login, token refresh and bearer authentication.

use std::sync::Arc;

use carenet_persistence::UniqueKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::password::{hash_credential_blocking, verify_credential_blocking};
use super::token::{TokenKind, TokenPair, TokenService};
use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::user::normalize_email;
use crate::domain::{
    ApprovalStatus, Department, Hospital, PatientProfile, Role, StaffProfile, User, UserView,
    collections, new_id,
};
use crate::error::{AuthFailure, RestError, RestResult};
use crate::repository::{Repository, Versioned, query};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Unique key reserving a user's email.
pub fn email_key(email: &str) -> UniqueKey {
    UniqueKey::new("users.email", normalize_email(email))
}

/// Self-registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    /// Login email.
    pub email: String,
    /// Plaintext password.
    pub password: String,
    /// Display name.
    pub name: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Requested role: patient, doctor, nurse or department_staff.
    #[serde(default = "default_role")]
    pub role: Role,
    /// Hospital to join.
    pub hospital_id: String,
    /// Department to join (department staff only).
    #[serde(default)]
    pub department_id: Option<String>,
    /// Patient fields.
    #[serde(default)]
    pub patient: Option<PatientProfile>,
    /// Staff fields.
    #[serde(default)]
    pub staff: Option<StaffProfile>,
}

fn default_role() -> Role {
    Role::Patient
}

/// Login request.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// Tokens plus the signed-in user.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    /// Issued tokens.
    #[serde(flatten)]
    pub tokens: TokenPair,
    /// The user.
    pub user: UserView,
}

/// Self-service profile changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// New address.
    #[serde(default)]
    pub address: Option<String>,
    /// Patient fields (patients only).
    #[serde(default)]
    pub patient: Option<PatientProfile>,
    /// Staff fields (clinical staff only).
    #[serde(default)]
    pub staff: Option<StaffProfile>,
}

/// Password change request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangePassword {
    /// Current password.
    pub current_password: String,
    /// New password.
    pub new_password: String,
}

/// Identity and session operations.
pub struct SessionService<S> {
    repo: Repository<S>,
    tokens: TokenService,
    audit: Arc<dyn AuditSink>,
    password_rounds: u32,
}

impl<S: carenet_persistence::DocumentStore> SessionService<S> {
    /// Creates the service.
    pub fn new(
        repo: Repository<S>,
        tokens: TokenService,
        audit: Arc<dyn AuditSink>,
        password_rounds: u32,
    ) -> Self {
        Self {
            repo,
            tokens,
            audit,
            password_rounds,
        }
    }

    async fn hash(&self, plaintext: &str) -> RestResult<String> {
        hash_credential_blocking(plaintext, self.password_rounds).await
    }

    /// Finds a user by email.
    pub async fn find_by_email(&self, email: &str) -> RestResult<Option<Versioned<User>>> {
        self.repo
            .first::<User>(&query::<User>().with_eq("email", normalize_email(email)))
            .await
    }

    /// Registers a patient (approved immediately) or a clinical staff member
    /// (pending approval with the requested role recorded).
    pub async fn register(&self, request: RegisterUser, now: DateTime<Utc>) -> RestResult<User> {
        validate_credentials(&request.email, &request.password)?;
        if request.name.trim().is_empty() {
            return Err(RestError::validation("Name is required"));
        }
        if !matches!(
            request.role,
            Role::Patient | Role::Doctor | Role::Nurse | Role::DepartmentStaff
        ) {
            return Err(RestError::validation_code(
                "role_not_allowed",
                format!("Role '{}' cannot be requested at registration", request.role),
            ));
        }

        let hospital = self
            .repo
            .find::<Hospital>(&request.hospital_id)
            .await?
            .map(Versioned::into_inner)
            .filter(|h| h.is_usable(now))
            .ok_or_else(|| {
                RestError::validation_code(
                    "hospital_unavailable",
                    format!("Hospital {} is not accepting registrations", request.hospital_id),
                )
            })?;

        let department_id = match (request.role, request.department_id) {
            (Role::DepartmentStaff, Some(department_id)) => {
                let department = self.repo.get::<Department>(&department_id).await?.value;
                if department.hospital_id != hospital.id || !department.active {
                    return Err(RestError::validation_code(
                        "department_unavailable",
                        format!("Department {} is not part of hospital {}", department_id, hospital.id),
                    ));
                }
                Some(department_id)
            }
            (Role::DepartmentStaff, None) => {
                return Err(RestError::validation(
                    "Department staff must name a department",
                ));
            }
            (_, department_id) => department_id,
        };

        let mut user = User::new(
            new_id(),
            &request.email,
            self.hash(&request.password).await?,
            request.name.trim().to_string(),
            request.role,
            now,
        );
        user.phone = request.phone;
        user.address = request.address;
        user.hospital_id = Some(hospital.id.clone());
        user.department_id = department_id;
        if request.role == Role::Patient {
            user.patient = Some(request.patient.unwrap_or_default());
        } else {
            user.role = Role::PendingApproval;
            user.requested_role = Some(request.role);
            user.approval_status = ApprovalStatus::Pending;
            user.staff = Some(request.staff.unwrap_or_default());
        }

        let key = email_key(&user.email);
        let user = self.repo.insert(user, vec![key]).await?.into_inner();
        info!(
            user_id = %user.id,
            role = %user.role,
            hospital_id = %hospital.id,
            "User registered"
        );
        self.audit
            .record(AuditEvent::new(
                &user.id,
                "user.register",
                "user",
                &user.id,
                AuditOutcome::Succeeded,
                now,
            ))
            .await;
        Ok(user)
    }

    /// Creates a user with an explicit role. Used for hospital admins,
    /// department logins and the bootstrap super admin.
    pub async fn provision(
        &self,
        mut user: User,
        password: &str,
    ) -> RestResult<User> {
        validate_credentials(&user.email, password)?;
        user.password_hash = self.hash(password).await?;
        let key = email_key(&user.email);
        Ok(self.repo.insert(user, vec![key]).await?.into_inner())
    }

    /// Returns an error when the email is already registered.
    pub async fn ensure_email_free(&self, email: &str) -> RestResult<()> {
        if self.find_by_email(email).await?.is_some() {
            return Err(RestError::Duplicate {
                message: format!("Email {} is already registered", normalize_email(email)),
            });
        }
        Ok(())
    }

    /// Exchanges email and password for a token pair.
    pub async fn login(&self, request: LoginRequest, now: DateTime<Utc>) -> RestResult<LoginResponse> {
        let invalid = RestError::Unauthenticated {
            reason: AuthFailure::InvalidCredential,
        };
        let Some(mut user) = self.find_by_email(&request.email).await? else {
            debug!(email = %normalize_email(&request.email), "Login for unknown email");
            return Err(invalid);
        };
        let matches =
            verify_credential_blocking(&request.password, &user.value.password_hash).await?;
        if !matches {
            warn!(user_id = %user.value.id, "Login with wrong password");
            return Err(invalid);
        }
        if !user.value.can_sign_in() {
            return Err(RestError::Unauthenticated {
                reason: AuthFailure::InactiveUser,
            });
        }

        let (tokens, jti) = self.tokens.issue_pair(&user.value.id, user.value.role, now)?;
        user.value.refresh_token_id = Some(jti);
        let user = self.repo.save(user).await?.into_inner();
        self.touch(&user.id, now).await;
        info!(user_id = %user.id, role = %user.role, "User signed in");

        Ok(LoginResponse {
            tokens,
            user: UserView::from(&user),
        })
    }

    /// Rotates a refresh token. A refresh token can be exchanged once; a
    /// replayed one is rejected.
    pub async fn refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> RestResult<TokenPair> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh, now)
            .map_err(|reason| RestError::Unauthenticated { reason })?;
        let invalid = || RestError::Unauthenticated {
            reason: AuthFailure::InvalidCredential,
        };

        let mut user = self.repo.find::<User>(&claims.sub).await?.ok_or_else(invalid)?;
        if !user.value.can_sign_in() {
            return Err(RestError::Unauthenticated {
                reason: AuthFailure::InactiveUser,
            });
        }
        if user.value.refresh_token_id.as_deref() != Some(claims.jti.as_str()) {
            warn!(user_id = %user.value.id, "Refresh token replayed or revoked");
            return Err(invalid());
        }

        let (tokens, jti) = self.tokens.issue_pair(&user.value.id, user.value.role, now)?;
        user.value.refresh_token_id = Some(jti);
        self.repo.save(user).await.map_err(|e| match e {
            RestError::StateConflict { .. } => invalid(),
            other => other,
        })?;
        Ok(tokens)
    }

    /// Revokes the user's refresh token.
    pub async fn logout(&self, user_id: &str) -> RestResult<()> {
        let mut user = self.repo.get::<User>(user_id).await?;
        if user.value.refresh_token_id.take().is_some() {
            self.repo.save(user).await?;
        }
        Ok(())
    }

    /// Resolves a bearer access token to an active user.
    pub async fn authenticate(&self, access_token: &str, now: DateTime<Utc>) -> RestResult<User> {
        let claims = self
            .tokens
            .verify(access_token, TokenKind::Access, now)
            .map_err(|reason| RestError::Unauthenticated { reason })?;
        let user = self
            .repo
            .find::<User>(&claims.sub)
            .await?
            .ok_or(RestError::Unauthenticated {
                reason: AuthFailure::InvalidCredential,
            })?
            .into_inner();
        if !user.can_sign_in() {
            return Err(RestError::Unauthenticated {
                reason: AuthFailure::InactiveUser,
            });
        }
        self.touch(&user.id, now).await;
        Ok(user)
    }

    /// Records the last-seen time. Kept out of the user document so it
    /// never contends with user updates.
    async fn touch(&self, user_id: &str, now: DateTime<Utc>) {
        let content = json!({ "user_id": user_id, "last_seen_at": now });
        if let Err(e) = self
            .repo
            .store()
            .upsert(collections::USER_ACTIVITY, user_id, content)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to record last-seen time");
        }
    }

    /// Applies self-service profile changes.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> RestResult<User> {
        let mut user = self.repo.get::<User>(user_id).await?;
        let u = &mut user.value;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(RestError::validation("Name cannot be empty"));
            }
            u.name = name.trim().to_string();
        }
        if update.phone.is_some() {
            u.phone = update.phone;
        }
        if update.address.is_some() {
            u.address = update.address;
        }
        if let Some(patient) = update.patient {
            if u.role != Role::Patient {
                return Err(RestError::validation("Only patients have patient fields"));
            }
            u.patient = Some(patient);
        }
        if let Some(staff) = update.staff {
            if u.role == Role::Patient {
                return Err(RestError::validation("Patients have no staff fields"));
            }
            u.staff = Some(staff);
        }
        u.updated_at = now;
        Ok(self.repo.save(user).await?.into_inner())
    }

    /// Changes the password and revokes the refresh token.
    pub async fn change_password(
        &self,
        user_id: &str,
        request: ChangePassword,
        now: DateTime<Utc>,
    ) -> RestResult<()> {
        let mut user = self.repo.get::<User>(user_id).await?;
        let matches =
            verify_credential_blocking(&request.current_password, &user.value.password_hash)
                .await?;
        if !matches {
            return Err(RestError::validation_code(
                "wrong_password",
                "Current password is incorrect",
            ));
        }
        validate_password(&request.new_password)?;
        user.value.password_hash = self.hash(&request.new_password).await?;
        user.value.refresh_token_id = None;
        user.value.updated_at = now;
        self.repo.save(user).await?;
        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Seeds a platform super admin if no user holds the email yet.
    pub async fn bootstrap_super_admin(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> RestResult<User> {
        if let Some(existing) = self.find_by_email(email).await? {
            if existing.value.role != Role::SuperAdmin {
                warn!(email = %existing.value.email, role = %existing.value.role, "Bootstrap email belongs to a non-admin user");
            }
            return Ok(existing.into_inner());
        }
        let user = User::new(
            new_id(),
            email,
            String::new(),
            "Platform Administrator".to_string(),
            Role::SuperAdmin,
            now,
        );
        let user = self.provision(user, password).await?;
        info!(user_id = %user.id, email = %user.email, "Bootstrap super admin created");
        Ok(user)
    }
}

fn validate_password(password: &str) -> RestResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(RestError::validation_code(
            "weak_password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

/// Checks the shape of an email address.
pub fn validate_email(email: &str) -> RestResult<()> {
    let email = normalize_email(email);
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(RestError::validation_code(
            "invalid_email",
            format!("'{}' is not a valid email address", email),
        ));
    }
    Ok(())
}

/// Checks the shape of an email and password.
pub fn validate_credentials(email: &str, password: &str) -> RestResult<()> {
    validate_email(email)?;
    validate_password(password)
}
