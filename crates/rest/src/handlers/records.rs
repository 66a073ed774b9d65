//! Clinical record handlers: medical records, prescriptions and test results.
//!
//! Every read goes through the access authorizer; see [`crate::access`].

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use tracing::debug;

use crate::domain::{Attachment, MedicalRecord, Prescription, TestResult};
use crate::error::RestResult;
use crate::extractors::{Actor, ApiJson, FileUpload, PageQuery};
use crate::records::{
    CreateMedicalRecord, CreatePrescription, DownloadLink, MedicalRecordUpdate,
    PrescriptionUpdate,
};
use crate::state::AppState;

/// Handler for medical record creation.
///
/// # HTTP Request
///
/// `POST /medical-records` (doctor or nurse of the patient's hospital)
///
/// # Response
///
/// - `201 Created` - The record
/// - `403 Forbidden` - Wrong role or patient of another hospital
pub async fn create_medical_record_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<CreateMedicalRecord>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing create medical record request");
    let record = state
        .records()
        .create_medical_record(&actor, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// `GET /medical-records/{id}`
pub async fn read_medical_record_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<MedicalRecord>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read medical record request");
    let record = state
        .records()
        .medical_record(&actor, &id, Utc::now())
        .await?;
    Ok(Json(record))
}

/// Handler for a patient's medical records.
///
/// # HTTP Request
///
/// `GET /medical-records/patient/{patient_id}?page=&count=`
///
/// Newest first. Records the caller's access path does not cover are
/// omitted; diagnosis is redacted under grants without diagnosis access.
pub async fn patient_medical_records_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(patient_id): Path<String>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<MedicalRecord>>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        patient_id = %patient_id,
        "Processing patient medical records request"
    );
    let records = state
        .records()
        .medical_records_for_patient(&actor, &patient_id, pagination, Utc::now())
        .await?;
    Ok(Json(records))
}

/// `PUT /medical-records/{id}`
pub async fn update_medical_record_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<MedicalRecordUpdate>,
) -> RestResult<Json<MedicalRecord>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing update medical record request");
    let record = state
        .records()
        .update_medical_record(&actor, &id, update, Utc::now())
        .await?;
    Ok(Json(record))
}

/// Handler for attaching a file to a medical record.
///
/// # HTTP Request
///
/// `POST /medical-records/{id}/attachments` as `multipart/form-data` with a
/// `file` part.
///
/// # Response
///
/// - `201 Created` - The attachment
/// - `413 Payload Too Large` - File over the upload cap
/// - `415 Unsupported Media Type` - File type not allowed
pub async fn add_attachment_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    FileUpload(upload): FileUpload,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing add attachment request");
    let attachment: Attachment = state
        .records()
        .add_attachment(&actor, &id, upload, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)).into_response())
}

/// `GET /medical-records/{id}/attachments/{attachment_id}` returns a
/// presigned download link.
pub async fn attachment_link_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path((id, attachment_id)): Path<(String, String)>,
) -> RestResult<Json<DownloadLink>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        id = %id,
        attachment_id = %attachment_id,
        "Processing attachment link request"
    );
    let link = state
        .records()
        .attachment_link(&actor, &id, &attachment_id, Utc::now())
        .await?;
    Ok(Json(link))
}

/// `POST /prescriptions` (doctor of the patient's hospital)
pub async fn create_prescription_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<CreatePrescription>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing create prescription request");
    let prescription = state
        .records()
        .create_prescription(&actor, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(prescription)).into_response())
}

/// `GET /prescriptions/{id}`
pub async fn read_prescription_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<Prescription>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read prescription request");
    let prescription = state
        .records()
        .prescription(&actor, &id, Utc::now())
        .await?;
    Ok(Json(prescription))
}

/// `GET /prescriptions/patient/{patient_id}`
pub async fn patient_prescriptions_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(patient_id): Path<String>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<Prescription>>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        patient_id = %patient_id,
        "Processing patient prescriptions request"
    );
    let prescriptions = state
        .records()
        .prescriptions_for_patient(&actor, &patient_id, pagination, Utc::now())
        .await?;
    Ok(Json(prescriptions))
}

/// `PUT /prescriptions/{id}`
pub async fn update_prescription_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<PrescriptionUpdate>,
) -> RestResult<Json<Prescription>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing update prescription request");
    let prescription = state
        .records()
        .update_prescription(&actor, &id, update, Utc::now())
        .await?;
    Ok(Json(prescription))
}

/// `GET /test-results/{id}`
pub async fn read_test_result_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<TestResult>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read test result request");
    let result = state.records().test_result(&actor, &id, Utc::now()).await?;
    Ok(Json(result))
}

/// `GET /test-results/patient/{patient_id}`
pub async fn patient_test_results_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(patient_id): Path<String>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<TestResult>>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        patient_id = %patient_id,
        "Processing patient test results request"
    );
    let results = state
        .records()
        .test_results_for_patient(&actor, &patient_id, pagination, Utc::now())
        .await?;
    Ok(Json(results))
}
