//! User roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a user acts under.
///
/// `PendingApproval` is the effective role of a staff member whose requested
/// role has not been approved yet; it carries no permissions beyond reading
/// one's own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform operator.
    SuperAdmin,
    /// Administrator of one hospital.
    HospitalAdmin,
    /// Physician.
    Doctor,
    /// Nurse.
    Nurse,
    /// Staff of a single department (lab, radiology, ...).
    DepartmentStaff,
    /// Patient.
    Patient,
    /// Awaiting approval of a requested role.
    PendingApproval,
}

impl Role {
    /// Roles that read clinical records of their hospital (and of sharing partners).
    pub fn is_clinical_reader(&self) -> bool {
        matches!(self, Role::HospitalAdmin | Role::Doctor | Role::Nurse)
    }

    /// Roles that must be affiliated with a hospital to do anything.
    pub fn requires_hospital(&self) -> bool {
        matches!(
            self,
            Role::HospitalAdmin | Role::Doctor | Role::Nurse | Role::DepartmentStaff
        )
    }

    /// Roles that go through staff approval when self-registering.
    pub fn needs_approval(&self) -> bool {
        matches!(self, Role::Doctor | Role::Nurse | Role::DepartmentStaff)
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::HospitalAdmin => "hospital_admin",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::DepartmentStaff => "department_staff",
            Role::Patient => "patient",
            Role::PendingApproval => "pending_approval",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(Role::DepartmentStaff).unwrap(),
            "department_staff"
        );
        let role: Role = serde_json::from_str("\"hospital_admin\"").unwrap();
        assert_eq!(role, Role::HospitalAdmin);
        assert_eq!(role.to_string(), "hospital_admin");
    }

    #[test]
    fn test_role_groups() {
        assert!(Role::Nurse.is_clinical_reader());
        assert!(!Role::DepartmentStaff.is_clinical_reader());
        assert!(Role::DepartmentStaff.requires_hospital());
        assert!(!Role::Patient.requires_hospital());
        assert!(!Role::HospitalAdmin.needs_approval());
    }
}
