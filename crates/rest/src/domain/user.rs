//! User entity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::hospital::ApprovalStatus;
use super::role::Role;

/// Patient-only profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    /// Date of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    /// Gender as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// ABO/Rh blood type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
}

/// Clinical staff profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffProfile {
    /// Professional license number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    /// Specialization (cardiology, pediatrics, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
}

/// A user of any role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: String,
    /// Login email, stored lower-cased and unique.
    pub email: String,
    /// Credential hash from [`hash_credential`](crate::identity::password::hash_credential).
    pub password_hash: String,
    /// Display name.
    pub name: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Effective role.
    pub role: Role,
    /// Role asked for at registration while the user is pending.
    #[serde(default)]
    pub requested_role: Option<Role>,
    /// Hospital affiliation.
    #[serde(default)]
    pub hospital_id: Option<String>,
    /// Department affiliation.
    #[serde(default)]
    pub department_id: Option<String>,
    /// Soft-delete flag.
    pub active: bool,
    /// Approval state.
    pub approval_status: ApprovalStatus,
    /// Who approved or rejected the user.
    #[serde(default)]
    pub reviewed_by: Option<String>,
    /// When the user was approved or rejected.
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Why the user was rejected.
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Patient fields.
    #[serde(default)]
    pub patient: Option<PatientProfile>,
    /// Staff fields.
    #[serde(default)]
    pub staff: Option<StaffProfile>,
    /// ID of the only refresh token that may still be exchanged.
    #[serde(default)]
    pub refresh_token_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Builds a new active user at `now`.
    pub fn new(
        id: String,
        email: &str,
        password_hash: String,
        name: String,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: normalize_email(email),
            password_hash,
            name,
            phone: None,
            address: None,
            role,
            requested_role: None,
            hospital_id: None,
            department_id: None,
            active: true,
            approval_status: ApprovalStatus::Approved,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            patient: None,
            staff: None,
            refresh_token_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the user may sign in at all.
    pub fn can_sign_in(&self) -> bool {
        self.active && self.approval_status != ApprovalStatus::Rejected
    }

    /// True while the user awaits approval.
    pub fn is_pending(&self) -> bool {
        self.role == Role::PendingApproval || self.approval_status == ApprovalStatus::Pending
    }
}

/// Lower-cases and trims an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The public projection of a user, without credential material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    /// User ID.
    pub id: String,
    /// Email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Effective role.
    pub role: Role,
    /// Role awaiting approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_role: Option<Role>,
    /// Hospital affiliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    /// Department affiliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    /// Soft-delete flag.
    pub active: bool,
    /// Approval state.
    pub approval_status: ApprovalStatus,
    /// Why the user was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Patient fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientProfile>,
    /// Staff fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff: Option<StaffProfile>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            address: user.address.clone(),
            role: user.role,
            requested_role: user.requested_role,
            hospital_id: user.hospital_id.clone(),
            department_id: user.department_id.clone(),
            active: user.active,
            approval_status: user.approval_status,
            rejection_reason: user.rejection_reason.clone(),
            patient: user.patient.clone(),
            staff: user.staff.clone(),
            created_at: user.created_at,
        }
    }
}
