//! Hospital (tenant root) entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review state shared by users and hospitals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting review.
    Pending,
    /// Accepted.
    Approved,
    /// Refused.
    Rejected,
}

/// Subscription tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    /// Entry tier.
    #[default]
    Basic,
    /// Middle tier.
    Standard,
    /// Full feature set.
    Premium,
}

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Not activated yet.
    Pending,
    /// In good standing.
    Active,
    /// Suspended by the platform.
    Suspended,
    /// Past its expiry.
    Expired,
}

/// A hospital's subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Plan tier.
    pub plan: SubscriptionPlan,
    /// Stored status. Use [`Subscription::effective_status`] for decisions.
    pub status: SubscriptionStatus,
    /// Start of the current term.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End of the current term.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Reference of the last (simulated) payment.
    #[serde(default)]
    pub last_payment_reference: Option<String>,
}

impl Subscription {
    /// A pending subscription on the given plan.
    pub fn pending(plan: SubscriptionPlan) -> Self {
        Self {
            plan,
            status: SubscriptionStatus::Pending,
            started_at: None,
            expires_at: None,
            last_payment_reference: None,
        }
    }

    /// The status at `now`: an active subscription past its expiry is expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match (self.status, self.expires_at) {
            (SubscriptionStatus::Active, Some(expires_at)) if now >= expires_at => {
                SubscriptionStatus::Expired
            }
            (status, _) => status,
        }
    }
}

/// Per-hospital feature switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalFeatures {
    /// May take part in cross-hospital sharing.
    #[serde(default)]
    pub cross_hospital_sharing: bool,
    /// Telemedicine consultations.
    #[serde(default)]
    pub telemedicine: bool,
    /// Online payments by patients.
    #[serde(default = "default_true")]
    pub online_payments: bool,
    /// Laboratory integration.
    #[serde(default = "default_true")]
    pub lab_integration: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HospitalFeatures {
    fn default() -> Self {
        Self {
            cross_hospital_sharing: false,
            telemedicine: false,
            online_payments: true,
            lab_integration: true,
        }
    }
}

/// Cached counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalStats {
    /// Active staff (admins, doctors, nurses, department staff).
    pub staff_count: u64,
    /// Active patients.
    pub patient_count: u64,
    /// Active departments.
    pub department_count: u64,
    /// When the counts were computed.
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// A hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    /// Hospital ID.
    pub id: String,
    /// Unique name.
    pub name: String,
    /// Unique registration number.
    pub registration_number: String,
    /// Unique contact email.
    pub email: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Review state.
    pub approval_status: ApprovalStatus,
    /// Who approved or rejected the hospital.
    #[serde(default)]
    pub reviewed_by: Option<String>,
    /// When it was approved or rejected.
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Why it was rejected.
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Subscription.
    pub subscription: Subscription,
    /// Feature switches.
    #[serde(default)]
    pub features: HospitalFeatures,
    /// Cached counts.
    #[serde(default)]
    pub stats: HospitalStats,
    /// The admin user created at registration.
    pub admin_user_id: String,
    /// Soft-delete flag.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Hospital {
    /// Approved, active and subscription-active at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.approval_status == ApprovalStatus::Approved
            && self.subscription.effective_status(now) == SubscriptionStatus::Active
    }
}
