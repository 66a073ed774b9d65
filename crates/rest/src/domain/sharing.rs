//! Hospital sharing agreements.
//!
//! A [`HospitalSharing`] record is a directed grant: the requesting hospital
//! may read data owned by the target hospital. The reverse direction needs
//! its own record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sharing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingStatus {
    /// Awaiting platform review.
    Pending,
    /// In force (subject to expiry).
    Approved,
    /// Refused.
    Rejected,
    /// Withdrawn after approval. Terminal.
    Revoked,
}

/// Which patients a grant covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingScope {
    /// Every patient of the target hospital.
    #[default]
    Full,
    /// Only the listed patients.
    Limited,
}

/// Kinds of data a grant exposes. All on unless switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingPermissions {
    /// Medical records.
    #[serde(default = "default_true")]
    pub view_medical_records: bool,
    /// Test results and orders.
    #[serde(default = "default_true")]
    pub view_test_results: bool,
    /// Prescriptions.
    #[serde(default = "default_true")]
    pub view_prescriptions: bool,
    /// Diagnosis fields inside medical records.
    #[serde(default = "default_true")]
    pub view_diagnosis: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SharingPermissions {
    fn default() -> Self {
        Self {
            view_medical_records: true,
            view_test_results: true,
            view_prescriptions: true,
            view_diagnosis: true,
        }
    }
}

/// Usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingUsage {
    /// Number of successful reads through the grant.
    pub access_count: u64,
    /// Time of the latest such read.
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// A directed, time-bounded sharing agreement between two hospitals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalSharing {
    /// Record ID.
    pub id: String,
    /// The hospital that wants to read.
    pub requesting_hospital_id: String,
    /// The hospital whose data is read.
    pub target_hospital_id: String,
    /// Lifecycle status.
    pub status: SharingStatus,
    /// Cleared by revocation.
    pub is_active: bool,
    /// Patient coverage.
    #[serde(default)]
    pub scope: SharingScope,
    /// Covered patients when the scope is limited.
    #[serde(default)]
    pub patient_ids: Vec<String>,
    /// Data kinds exposed.
    #[serde(default)]
    pub permissions: SharingPermissions,
    /// Optional end of the grant.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Why access is requested.
    pub reason: String,
    /// The admin who filed the request.
    pub requested_by: String,
    /// The super admin who approved, rejected or revoked it.
    #[serde(default)]
    pub reviewed_by: Option<String>,
    /// When it was approved.
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// When it was rejected or revoked.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Why it was rejected or revoked.
    #[serde(default)]
    pub decision_reason: Option<String>,
    /// Usage counters.
    #[serde(default)]
    pub usage: SharingUsage,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl HospitalSharing {
    /// True when the record grants access at `now`: approved, active and
    /// not past its expiry.
    pub fn can_access(&self, now: DateTime<Utc>) -> bool {
        self.status == SharingStatus::Approved
            && self.is_active
            && self.expires_at.is_none_or(|expires_at| now < expires_at)
    }

    /// True when the grant's scope includes the patient.
    pub fn covers_patient(&self, patient_id: &str) -> bool {
        match self.scope {
            SharingScope::Full => true,
            SharingScope::Limited => self.patient_ids.iter().any(|id| id == patient_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: SharingStatus) -> HospitalSharing {
        let now = Utc::now();
        HospitalSharing {
            id: "s-1".to_string(),
            requesting_hospital_id: "h-1".to_string(),
            target_hospital_id: "h-2".to_string(),
            status,
            is_active: true,
            scope: SharingScope::Full,
            patient_ids: vec![],
            permissions: SharingPermissions::default(),
            expires_at: None,
            reason: "Referral".to_string(),
            requested_by: "u-1".to_string(),
            reviewed_by: None,
            approved_at: None,
            closed_at: None,
            decision_reason: None,
            usage: SharingUsage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_can_access_requires_approved_and_active() {
        let now = Utc::now();
        assert!(record(SharingStatus::Approved).can_access(now));
        assert!(!record(SharingStatus::Pending).can_access(now));
        assert!(!record(SharingStatus::Rejected).can_access(now));

        let mut revoked = record(SharingStatus::Approved);
        revoked.is_active = false;
        assert!(!revoked.can_access(now));
    }

    #[test]
    fn test_can_access_respects_expiry() {
        let now = Utc::now();
        let mut grant = record(SharingStatus::Approved);
        grant.expires_at = Some(now + Duration::hours(1));
        assert!(grant.can_access(now));
        assert!(!grant.can_access(now + Duration::hours(1)));
        assert!(!grant.can_access(now + Duration::hours(2)));
    }

    #[test]
    fn test_limited_scope() {
        let mut grant = record(SharingStatus::Approved);
        assert!(grant.covers_patient("anyone"));
        grant.scope = SharingScope::Limited;
        grant.patient_ids = vec!["p-1".to_string()];
        assert!(grant.covers_patient("p-1"));
        assert!(!grant.covers_patient("p-2"));
    }

    #[test]
    fn test_permissions_default_on() {
        let perms: SharingPermissions =
            serde_json::from_str(r#"{"view_diagnosis": false}"#).unwrap();
        assert!(perms.view_medical_records);
        assert!(!perms.view_diagnosis);
    }
}
