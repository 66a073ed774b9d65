//! Clinical artifacts: medical records, prescriptions and test results.
//!
//! Each artifact is owned by one patient, authored by one clinician and
//! carries hospital/department provenance. Artifacts are never hard-deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vital signs captured at a visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalSigns {
    /// Blood pressure as `systolic/diastolic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    /// Beats per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    /// Degrees Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Breaths per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<u32>,
    /// Kilograms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Centimetres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A file attached to a medical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment ID.
    pub id: String,
    /// Stable blob URL.
    pub url: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Uploader.
    pub uploaded_by: String,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
}

/// A visit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecord {
    /// Record ID.
    pub id: String,
    /// Owning patient.
    pub patient_id: String,
    /// Owning hospital.
    pub hospital_id: String,
    /// Department of the visit.
    #[serde(default)]
    pub department_id: Option<String>,
    /// Authoring doctor or nurse.
    pub author_id: String,
    /// Visit date.
    pub visit_date: DateTime<Utc>,
    /// Reason for the visit.
    pub chief_complaint: String,
    /// Diagnosis. Redacted on sharing grants without diagnosis access.
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Reported symptoms.
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Treatment given or planned.
    #[serde(default)]
    pub treatment: Option<String>,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Vital signs.
    #[serde(default)]
    pub vital_signs: Option<VitalSigns>,
    /// Attached files.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl MedicalRecord {
    /// Drops the diagnosis for readers whose grant excludes it.
    pub fn redact_diagnosis(&mut self) {
        self.diagnosis = None;
    }
}

/// One prescribed medication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    /// Drug name.
    pub name: String,
    /// Dose per intake.
    pub dosage: String,
    /// How often.
    pub frequency: String,
    /// For how long.
    #[serde(default)]
    pub duration: Option<String>,
    /// Extra instructions.
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Prescription lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    /// In effect.
    #[default]
    Active,
    /// Course finished.
    Completed,
    /// Withdrawn.
    Cancelled,
}

/// A prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    /// Prescription ID.
    pub id: String,
    /// Owning patient.
    pub patient_id: String,
    /// Owning hospital.
    pub hospital_id: String,
    /// Department.
    #[serde(default)]
    pub department_id: Option<String>,
    /// Prescribing doctor.
    pub author_id: String,
    /// Related medical record.
    #[serde(default)]
    pub medical_record_id: Option<String>,
    /// Prescribed medications (at least one).
    pub medications: Vec<Medication>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: PrescriptionStatus,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// One measured value in a test result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultValue {
    /// Parameter name.
    pub parameter: String,
    /// Measured value.
    pub value: String,
    /// Unit of measure.
    #[serde(default)]
    pub unit: Option<String>,
    /// Reference range.
    #[serde(default)]
    pub reference_range: Option<String>,
    /// Outside the reference range.
    #[serde(default)]
    pub abnormal: bool,
}

/// The outcome of a fulfilled test order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Result ID.
    pub id: String,
    /// The order it fulfils.
    pub test_order_id: String,
    /// Owning patient.
    pub patient_id: String,
    /// Owning hospital.
    pub hospital_id: String,
    /// Performing department.
    pub department_id: String,
    /// The department staff member who uploaded it.
    pub author_id: String,
    /// Test name, copied from the order.
    pub test_name: String,
    /// Summary or conclusion.
    #[serde(default)]
    pub summary: Option<String>,
    /// Measured values.
    #[serde(default)]
    pub values: Vec<ResultValue>,
    /// Report file URL.
    #[serde(default)]
    pub file_url: Option<String>,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
