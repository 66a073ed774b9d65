//! Clinical artifacts: medical records (with attachments), prescriptions
//! and test results.
//!
//! Every read and write goes through the [`Authorizer`]. Collection reads
//! for a patient are authorized against the patient's hospital and then
//! narrowed to the records that decision actually covers.

use std::sync::Arc;

use carenet_persistence::types::{Pagination, SortOrder};
use carenet_persistence::{BlobMetadata, BlobStore, DocumentQuery, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{
    Authorizer, ReadAccess, ResourceKind, Target, WriteAction, owning_hospital,
};
use crate::domain::{
    Attachment, MedicalRecord, Medication, Prescription, PrescriptionStatus, Role, TestResult,
    User, VitalSigns, new_id,
};
use crate::error::{RestError, RestResult};
use crate::repository::{Entity, Repository, query};
use crate::sharing::GrantLookup;
use crate::uploads::Upload;

/// Medical record creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMedicalRecord {
    /// The patient.
    pub patient_id: String,
    /// Department of the visit.
    #[serde(default)]
    pub department_id: Option<String>,
    /// Visit date; defaults to now.
    #[serde(default)]
    pub visit_date: Option<DateTime<Utc>>,
    /// Reason for the visit.
    pub chief_complaint: String,
    /// Diagnosis.
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Symptoms.
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Treatment.
    #[serde(default)]
    pub treatment: Option<String>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Vital signs.
    #[serde(default)]
    pub vital_signs: Option<VitalSigns>,
}

/// Medical record update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicalRecordUpdate {
    /// New chief complaint.
    #[serde(default)]
    pub chief_complaint: Option<String>,
    /// New diagnosis.
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Replacement symptoms.
    #[serde(default)]
    pub symptoms: Option<Vec<String>>,
    /// New treatment.
    #[serde(default)]
    pub treatment: Option<String>,
    /// New notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Replacement vital signs.
    #[serde(default)]
    pub vital_signs: Option<VitalSigns>,
}

/// Prescription creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrescription {
    /// The patient.
    pub patient_id: String,
    /// Department.
    #[serde(default)]
    pub department_id: Option<String>,
    /// Related medical record.
    #[serde(default)]
    pub medical_record_id: Option<String>,
    /// Medications (at least one).
    pub medications: Vec<Medication>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Prescription update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriptionUpdate {
    /// Replacement medications.
    #[serde(default)]
    pub medications: Option<Vec<Medication>>,
    /// New status.
    #[serde(default)]
    pub status: Option<PrescriptionStatus>,
    /// New notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A presigned download link.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadLink {
    /// Time-limited URL.
    pub url: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
}

/// Clinical record operations.
pub struct ClinicalRecords<S, G> {
    repo: Repository<S>,
    authz: Authorizer<G>,
    blobs: Arc<dyn BlobStore>,
    max_upload_size: usize,
}

fn target_of<'a>(
    kind: ResourceKind,
    id: &'a str,
    patient_id: &'a str,
    hospital_id: &'a str,
    author_id: &'a str,
) -> Target<'a> {
    Target {
        kind,
        id,
        patient_id,
        hospital_id,
        author_id: Some(author_id),
    }
}

/// Whether a collection-level decision covers a record of `record_hospital`.
fn covers(access: &ReadAccess, patient_hospital: &str, record_hospital: &str) -> bool {
    matches!(access, ReadAccess::SuperAdmin | ReadAccess::OwnData)
        || record_hospital == patient_hospital
}

fn validate_medications(medications: &[Medication]) -> RestResult<()> {
    if medications.is_empty() {
        return Err(RestError::validation(
            "A prescription needs at least one medication",
        ));
    }
    if medications
        .iter()
        .any(|m| m.name.trim().is_empty() || m.dosage.trim().is_empty())
    {
        return Err(RestError::validation(
            "Every medication needs a name and a dosage",
        ));
    }
    Ok(())
}

impl<S: DocumentStore, G: GrantLookup> ClinicalRecords<S, G> {
    /// Creates the service.
    pub fn new(
        repo: Repository<S>,
        authz: Authorizer<G>,
        blobs: Arc<dyn BlobStore>,
        max_upload_size: usize,
    ) -> Self {
        Self {
            repo,
            authz,
            blobs,
            max_upload_size,
        }
    }

    /// Loads a user that must be a patient.
    pub async fn patient(&self, id: &str) -> RestResult<User> {
        let user = self.repo.get::<User>(id).await?.into_inner();
        if user.role != Role::Patient {
            return Err(RestError::validation_code(
                "not_a_patient",
                format!("User {} is not a patient", id),
            ));
        }
        Ok(user)
    }

    /// Authorizes a collection read of one patient's records of `kind`.
    async fn authorize_patient_read(
        &self,
        actor: &User,
        kind: ResourceKind,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<(ReadAccess, String)> {
        let patient = self.patient(patient_id).await?;
        let hospital_id = owning_hospital(&patient)?.to_string();
        let target = Target {
            kind,
            id: patient_id,
            patient_id,
            hospital_id: &hospital_id,
            author_id: None,
        };
        let access = self.authz.authorize_read(actor, &target, now).await?;
        Ok((access, hospital_id))
    }

    fn patient_query<T: Entity>(patient_id: &str, pagination: Pagination) -> DocumentQuery {
        query::<T>()
            .with_eq("patient_id", patient_id)
            .with_sort(SortOrder::CreatedDesc)
            .with_pagination(pagination)
    }

    // Medical records

    /// Creates a medical record for a patient of the actor's hospital.
    pub async fn create_medical_record(
        &self,
        actor: &User,
        request: CreateMedicalRecord,
        now: DateTime<Utc>,
    ) -> RestResult<MedicalRecord> {
        if request.chief_complaint.trim().is_empty() {
            return Err(RestError::validation("A chief complaint is required"));
        }
        let patient = self.patient(&request.patient_id).await?;
        let hospital_id = owning_hospital(&patient)?.to_string();
        let id = new_id();
        let target = Target {
            kind: ResourceKind::MedicalRecord,
            id: &id,
            patient_id: &patient.id,
            hospital_id: &hospital_id,
            author_id: None,
        };
        self.authz
            .authorize_write(actor, &target, WriteAction::Create, now)
            .await?;

        let record = MedicalRecord {
            id: id.clone(),
            patient_id: patient.id.clone(),
            hospital_id: hospital_id.clone(),
            department_id: request.department_id,
            author_id: actor.id.clone(),
            visit_date: request.visit_date.unwrap_or(now),
            chief_complaint: request.chief_complaint.trim().to_string(),
            diagnosis: request.diagnosis,
            symptoms: request.symptoms,
            treatment: request.treatment,
            notes: request.notes,
            vital_signs: request.vital_signs,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let record = self.repo.insert(record, vec![]).await?.into_inner();
        info!(record_id = %record.id, patient_id = %record.patient_id, author_id = %actor.id, "Medical record created");
        Ok(record)
    }

    /// Reads a medical record, redacting the diagnosis where the grant
    /// requires it.
    pub async fn medical_record(
        &self,
        actor: &User,
        id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<MedicalRecord> {
        let mut record = self.repo.get::<MedicalRecord>(id).await?.into_inner();
        let access = self
            .authz
            .authorize_read(
                actor,
                &target_of(
                    ResourceKind::MedicalRecord,
                    &record.id,
                    &record.patient_id,
                    &record.hospital_id,
                    &record.author_id,
                ),
                now,
            )
            .await?;
        if access.redact_diagnosis() {
            record.redact_diagnosis();
        }
        Ok(record)
    }

    /// Lists a patient's medical records.
    pub async fn medical_records_for_patient(
        &self,
        actor: &User,
        patient_id: &str,
        pagination: Pagination,
        now: DateTime<Utc>,
    ) -> RestResult<Vec<MedicalRecord>> {
        let (access, hospital_id) = self
            .authorize_patient_read(actor, ResourceKind::MedicalRecord, patient_id, now)
            .await?;
        let records = self
            .repo
            .list::<MedicalRecord>(&Self::patient_query::<MedicalRecord>(patient_id, pagination))
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| covers(&access, &hospital_id, &r.hospital_id))
            .map(|mut r| {
                if access.redact_diagnosis() {
                    r.redact_diagnosis();
                }
                r
            })
            .collect())
    }

    /// Updates a medical record (author or hospital admin).
    pub async fn update_medical_record(
        &self,
        actor: &User,
        id: &str,
        update: MedicalRecordUpdate,
        now: DateTime<Utc>,
    ) -> RestResult<MedicalRecord> {
        let mut record = self.repo.get::<MedicalRecord>(id).await?;
        let r = &record.value;
        self.authz
            .authorize_write(
                actor,
                &target_of(ResourceKind::MedicalRecord, &r.id, &r.patient_id, &r.hospital_id, &r.author_id),
                WriteAction::Update,
                now,
            )
            .await?;

        let r = &mut record.value;
        if let Some(complaint) = update.chief_complaint {
            if complaint.trim().is_empty() {
                return Err(RestError::validation("A chief complaint is required"));
            }
            r.chief_complaint = complaint.trim().to_string();
        }
        if update.diagnosis.is_some() {
            r.diagnosis = update.diagnosis;
        }
        if let Some(symptoms) = update.symptoms {
            r.symptoms = symptoms;
        }
        if update.treatment.is_some() {
            r.treatment = update.treatment;
        }
        if update.notes.is_some() {
            r.notes = update.notes;
        }
        if update.vital_signs.is_some() {
            r.vital_signs = update.vital_signs;
        }
        r.updated_at = now;
        let record = self.repo.save(record).await?.into_inner();
        info!(record_id = %id, actor_id = %actor.id, "Medical record updated");
        Ok(record)
    }

    /// Stores a file and attaches it to a medical record.
    pub async fn add_attachment(
        &self,
        actor: &User,
        record_id: &str,
        upload: Upload,
        now: DateTime<Utc>,
    ) -> RestResult<Attachment> {
        let mut record = self.repo.get::<MedicalRecord>(record_id).await?;
        let r = &record.value;
        self.authz
            .authorize_write(
                actor,
                &target_of(ResourceKind::MedicalRecord, &r.id, &r.patient_id, &r.hospital_id, &r.author_id),
                WriteAction::Update,
                now,
            )
            .await?;
        let extension = upload.validate(self.max_upload_size)?;

        let size = upload.data.len() as u64;
        let metadata = BlobMetadata::new(
            "medical-records",
            r.patient_id.clone(),
            extension,
            upload.content_type.clone(),
        );
        let url = self.blobs.put(upload.data, metadata).await?;
        let attachment = Attachment {
            id: new_id(),
            url: url.clone(),
            file_name: upload.file_name,
            content_type: upload.content_type,
            size,
            uploaded_by: actor.id.clone(),
            uploaded_at: now,
        };
        record.value.attachments.push(attachment.clone());
        record.value.updated_at = now;
        if let Err(e) = self.repo.save(record).await {
            if let Err(cleanup) = self.blobs.delete(&url).await {
                warn!(url = %url, error = %cleanup, "Failed to remove orphaned attachment");
            }
            return Err(e);
        }
        info!(record_id = %record_id, attachment_id = %attachment.id, size, "Attachment stored");
        Ok(attachment)
    }

    /// Returns a presigned link to an attachment after a read check.
    pub async fn attachment_link(
        &self,
        actor: &User,
        record_id: &str,
        attachment_id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<DownloadLink> {
        let record = self.medical_record(actor, record_id, now).await?;
        let attachment = record
            .attachments
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or_else(|| RestError::not_found("attachment", attachment_id))?;
        debug!(record_id = %record_id, attachment_id = %attachment_id, "Issuing attachment link");
        Ok(DownloadLink {
            url: self.blobs.get(&attachment.url)?,
            file_name: attachment.file_name,
            content_type: attachment.content_type,
        })
    }

    // Prescriptions

    /// Creates a prescription for a patient of the actor's hospital.
    pub async fn create_prescription(
        &self,
        actor: &User,
        request: CreatePrescription,
        now: DateTime<Utc>,
    ) -> RestResult<Prescription> {
        validate_medications(&request.medications)?;
        let patient = self.patient(&request.patient_id).await?;
        let hospital_id = owning_hospital(&patient)?.to_string();
        let id = new_id();
        let target = Target {
            kind: ResourceKind::Prescription,
            id: &id,
            patient_id: &patient.id,
            hospital_id: &hospital_id,
            author_id: None,
        };
        self.authz
            .authorize_write(actor, &target, WriteAction::Create, now)
            .await?;

        let prescription = Prescription {
            id: id.clone(),
            patient_id: patient.id.clone(),
            hospital_id,
            department_id: request.department_id,
            author_id: actor.id.clone(),
            medical_record_id: request.medical_record_id,
            medications: request.medications,
            status: PrescriptionStatus::Active,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        let prescription = self.repo.insert(prescription, vec![]).await?.into_inner();
        info!(prescription_id = %prescription.id, patient_id = %prescription.patient_id, "Prescription created");
        Ok(prescription)
    }

    /// Reads a prescription.
    pub async fn prescription(
        &self,
        actor: &User,
        id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<Prescription> {
        let prescription = self.repo.get::<Prescription>(id).await?.into_inner();
        let p = &prescription;
        self.authz
            .authorize_read(
                actor,
                &target_of(ResourceKind::Prescription, &p.id, &p.patient_id, &p.hospital_id, &p.author_id),
                now,
            )
            .await?;
        Ok(prescription)
    }

    /// Lists a patient's prescriptions.
    pub async fn prescriptions_for_patient(
        &self,
        actor: &User,
        patient_id: &str,
        pagination: Pagination,
        now: DateTime<Utc>,
    ) -> RestResult<Vec<Prescription>> {
        let (access, hospital_id) = self
            .authorize_patient_read(actor, ResourceKind::Prescription, patient_id, now)
            .await?;
        let items = self
            .repo
            .list::<Prescription>(&Self::patient_query::<Prescription>(patient_id, pagination))
            .await?;
        Ok(items
            .into_iter()
            .filter(|p| covers(&access, &hospital_id, &p.hospital_id))
            .collect())
    }

    /// Updates a prescription (author or hospital admin).
    pub async fn update_prescription(
        &self,
        actor: &User,
        id: &str,
        update: PrescriptionUpdate,
        now: DateTime<Utc>,
    ) -> RestResult<Prescription> {
        let mut prescription = self.repo.get::<Prescription>(id).await?;
        let p = &prescription.value;
        self.authz
            .authorize_write(
                actor,
                &target_of(ResourceKind::Prescription, &p.id, &p.patient_id, &p.hospital_id, &p.author_id),
                WriteAction::Update,
                now,
            )
            .await?;

        let p = &mut prescription.value;
        if let Some(medications) = update.medications {
            validate_medications(&medications)?;
            p.medications = medications;
        }
        if let Some(status) = update.status {
            p.status = status;
        }
        if update.notes.is_some() {
            p.notes = update.notes;
        }
        p.updated_at = now;
        let prescription = self.repo.save(prescription).await?.into_inner();
        info!(prescription_id = %id, status = ?prescription.status, "Prescription updated");
        Ok(prescription)
    }

    // Test results

    /// Reads a test result.
    pub async fn test_result(
        &self,
        actor: &User,
        id: &str,
        now: DateTime<Utc>,
    ) -> RestResult<TestResult> {
        let result = self.repo.get::<TestResult>(id).await?.into_inner();
        let r = &result;
        self.authz
            .authorize_read(
                actor,
                &target_of(ResourceKind::TestResult, &r.id, &r.patient_id, &r.hospital_id, &r.author_id),
                now,
            )
            .await?;
        Ok(result)
    }

    /// Lists a patient's test results.
    pub async fn test_results_for_patient(
        &self,
        actor: &User,
        patient_id: &str,
        pagination: Pagination,
        now: DateTime<Utc>,
    ) -> RestResult<Vec<TestResult>> {
        let (access, hospital_id) = self
            .authorize_patient_read(actor, ResourceKind::TestResult, patient_id, now)
            .await?;
        let items = self
            .repo
            .list::<TestResult>(&Self::patient_query::<TestResult>(patient_id, pagination))
            .await?;
        Ok(items
            .into_iter()
            .filter(|r| covers(&access, &hospital_id, &r.hospital_id))
            .collect())
    }
}
