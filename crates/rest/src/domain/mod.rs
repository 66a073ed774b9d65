//! Domain entities.
//!
//! Each entity is a plain serde struct persisted as a JSON document in its
//! own collection. The collection names are exported as constants so every
//! service addresses the same place.

pub mod clinical;
pub mod department;
pub mod hospital;
pub mod role;
pub mod sharing;
pub mod test_order;
pub mod user;

pub use clinical::{
    Attachment, MedicalRecord, Medication, Prescription, PrescriptionStatus, ResultValue,
    TestResult, VitalSigns,
};
pub use department::{Department, DepartmentService, DepartmentType, OperatingHours, Weekday};
pub use hospital::{
    ApprovalStatus, Hospital, HospitalFeatures, HospitalStats, Subscription, SubscriptionPlan,
    SubscriptionStatus,
};
pub use role::Role;
pub use sharing::{HospitalSharing, SharingPermissions, SharingScope, SharingStatus, SharingUsage};
pub use test_order::{
    NewTestOrder, Payment, PaymentStatus, Priority, TestOrder, TestOrderStatus, TransitionError,
};
pub use user::{PatientProfile, StaffProfile, User, UserView};

/// Collection names.
pub mod collections {
    /// Users of every role.
    pub const USERS: &str = "users";
    /// Last-seen bookkeeping, kept apart from the user entity.
    pub const USER_ACTIVITY: &str = "user_activity";
    /// Hospitals (tenants).
    pub const HOSPITALS: &str = "hospitals";
    /// Departments of hospitals.
    pub const DEPARTMENTS: &str = "departments";
    /// Sharing agreements between hospitals.
    pub const HOSPITAL_SHARING: &str = "hospital_sharing";
    /// Medical records.
    pub const MEDICAL_RECORDS: &str = "medical_records";
    /// Prescriptions.
    pub const PRESCRIPTIONS: &str = "prescriptions";
    /// Test results.
    pub const TEST_RESULTS: &str = "test_results";
    /// Test orders.
    pub const TEST_ORDERS: &str = "test_orders";
    /// Audit events.
    pub const AUDIT_EVENTS: &str = "audit_events";
}

/// Generates a new entity ID.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
