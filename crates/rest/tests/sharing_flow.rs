//! Integration tests for cross-hospital sharing and the access authorizer.

mod common;

use carenet_rest::domain::HospitalSharing;
use chrono::{Duration, Utc};
use common::assertions::{assert_category, assert_error, assert_status};
use common::harness::{Session, Tenant, TestApp};
use serde_json::{Value, json};

/// Two sharing-enabled hospitals, a doctor in each, and an H2 patient with
/// one medical record.
struct World {
    app: TestApp,
    h1: Tenant,
    h2: Tenant,
    h1_doctor: Session,
    h2_doctor: Session,
    h2_patient: Session,
    record_id: String,
}

async fn world() -> World {
    let app = TestApp::new().await;
    let h1 = app.hospital("North").await;
    let h2 = app.hospital("South").await;
    app.enable_sharing(&h1).await;
    app.enable_sharing(&h2).await;
    let h1_doctor = app.staff(&h1, "doctor", None).await;
    let h2_doctor = app.staff(&h2, "doctor", None).await;
    let h2_patient = app.patient(&h2, "Grace Hopper").await;
    let record_id = app
        .medical_record(&h2_doctor, &h2_patient.id, "Bronchitis")
        .await;
    World {
        app,
        h1,
        h2,
        h1_doctor,
        h2_doctor,
        h2_patient,
        record_id,
    }
}

async fn request(app: &TestApp, from: &Tenant, to: &Tenant, extra: Value) -> String {
    let mut body = json!({"target_hospital_id": to.id, "reason": "Referral follow-up"});
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    let response = app
        .post("/hospital-sharing/request", &from.admin.token, body)
        .await;
    assert_status(&response, 201);
    let record: Value = response.json();
    assert_eq!(record["status"], "pending");
    record["id"].as_str().unwrap().to_string()
}

async fn approve(app: &TestApp, id: &str) -> Value {
    let response = app
        .post(
            &format!("/hospital-sharing/{}/approve", id),
            &app.super_admin.token,
            json!({}),
        )
        .await;
    assert_status(&response, 200);
    response.json()
}

#[tokio::test]
async fn test_approved_grant_allows_reads_but_not_writes() {
    let w = world().await;
    let records_path = format!("/medical-records/patient/{}", w.h2_patient.id);

    // No grant yet.
    let response = w.app.get(&records_path, &w.h1_doctor.token).await;
    assert_error(&response, 403, "other_tenant");

    let id = request(&w.app, &w.h1, &w.h2, json!({})).await;
    let grant = approve(&w.app, &id).await;
    assert_eq!(grant["status"], "approved");
    assert_eq!(grant["is_active"], true);

    let response = w.app.get(&records_path, &w.h1_doctor.token).await;
    assert_status(&response, 200);
    let records: Vec<Value> = response.json();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], w.record_id);
    assert_eq!(records[0]["diagnosis"], "Bronchitis");

    let response = w
        .app
        .get(&format!("/medical-records/{}", w.record_id), &w.h1_doctor.token)
        .await;
    assert_status(&response, 200);

    // Grants never confer write access.
    let response = w
        .app
        .post(
            "/prescriptions",
            &w.h1_doctor.token,
            json!({
                "patient_id": w.h2_patient.id,
                "medications": [{"name": "Amoxicillin", "dosage": "500mg", "frequency": "3x daily"}]
            }),
        )
        .await;
    assert_error(&response, 403, "sharing_read_only");

    let response = w
        .app
        .put(
            &format!("/medical-records/{}", w.record_id),
            &w.h1_doctor.token,
            json!({"notes": "Seen at North"}),
        )
        .await;
    assert_category(&response, "forbidden");

    // Usage is counted.
    let response = w
        .app
        .get(&format!("/hospital-sharing/{}", id), &w.h1.admin.token)
        .await;
    assert_status(&response, 200);
    assert!(response.json::<Value>()["usage"]["access_count"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn test_grants_are_directed() {
    let w = world().await;
    let id = request(&w.app, &w.h1, &w.h2, json!({})).await;
    approve(&w.app, &id).await;

    let h1_patient = w.app.patient(&w.h1, "Ada Lovelace").await;
    w.app
        .medical_record(&w.h1_doctor, &h1_patient.id, "Migraine")
        .await;

    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", h1_patient.id),
            &w.h2_doctor.token,
        )
        .await;
    assert_error(&response, 403, "other_tenant");
}

#[tokio::test]
async fn test_expired_grant_denies_without_mutation() {
    let w = world().await;
    let id = request(&w.app, &w.h1, &w.h2, json!({})).await;
    approve(&w.app, &id).await;
    let records_path = format!("/medical-records/patient/{}", w.h2_patient.id);
    assert_status(&w.app.get(&records_path, &w.h1_doctor.token).await, 200);

    let repo = w.app.state.repository();
    let mut grant = repo.get::<HospitalSharing>(&id).await.unwrap();
    grant.value.expires_at = Some(Utc::now() - Duration::minutes(1));
    let saved = repo.save(grant).await.unwrap();
    let version = saved.version();

    let response = w.app.get(&records_path, &w.h1_doctor.token).await;
    assert_error(&response, 403, "other_tenant");

    let grant = repo.get::<HospitalSharing>(&id).await.unwrap();
    assert_eq!(grant.version(), version);
    assert_eq!(grant.value.status, carenet_rest::domain::SharingStatus::Approved);
    assert!(grant.value.is_active);
}

#[tokio::test]
async fn test_revoked_grant_denies_reads() {
    let w = world().await;
    let id = request(&w.app, &w.h1, &w.h2, json!({})).await;
    approve(&w.app, &id).await;

    let response = w
        .app
        .post(
            &format!("/hospital-sharing/{}/revoke", id),
            &w.app.super_admin.token,
            json!({"reason": "Agreement ended"}),
        )
        .await;
    assert_status(&response, 200);
    let record: Value = response.json();
    assert_eq!(record["status"], "revoked");
    assert_eq!(record["is_active"], false);

    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", w.h2_patient.id),
            &w.h1_doctor.token,
        )
        .await;
    assert_category(&response, "forbidden");

    // Revocation is terminal.
    let response = w
        .app
        .post(
            &format!("/hospital-sharing/{}/revoke", id),
            &w.app.super_admin.token,
            json!({}),
        )
        .await;
    assert_error(&response, 409, "not_approved");
}

#[tokio::test]
async fn test_diagnosis_redacted_without_permission() {
    let w = world().await;
    let id = request(
        &w.app,
        &w.h1,
        &w.h2,
        json!({"permissions": {"view_diagnosis": false}}),
    )
    .await;
    approve(&w.app, &id).await;

    let response = w
        .app
        .get(&format!("/medical-records/{}", w.record_id), &w.h1_doctor.token)
        .await;
    assert_status(&response, 200);
    assert!(response.json::<Value>()["diagnosis"].is_null());

    // The owning hospital still sees it.
    let response = w
        .app
        .get(&format!("/medical-records/{}", w.record_id), &w.h2_doctor.token)
        .await;
    assert_eq!(response.json::<Value>()["diagnosis"], "Bronchitis");
}

#[tokio::test]
async fn test_permission_flags_limit_kinds() {
    let w = world().await;
    let id = request(
        &w.app,
        &w.h1,
        &w.h2,
        json!({"permissions": {"view_prescriptions": false}}),
    )
    .await;
    approve(&w.app, &id).await;

    let response = w
        .app
        .get(
            &format!("/prescriptions/patient/{}", w.h2_patient.id),
            &w.h1_doctor.token,
        )
        .await;
    assert_error(&response, 403, "sharing_permission_denied");

    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", w.h2_patient.id),
            &w.h1_doctor.token,
        )
        .await;
    assert_status(&response, 200);
}

#[tokio::test]
async fn test_request_guards() {
    let w = world().await;

    let response = w
        .app
        .post(
            "/hospital-sharing/request",
            &w.h1.admin.token,
            json!({"target_hospital_id": w.h1.id, "reason": "Self"}),
        )
        .await;
    assert_error(&response, 400, "self_sharing");

    let response = w
        .app
        .post(
            "/hospital-sharing/request",
            &w.h1_doctor.token,
            json!({"target_hospital_id": w.h2.id, "reason": "Referral"}),
        )
        .await;
    assert_error(&response, 403, "insufficient_role");

    let id = request(&w.app, &w.h1, &w.h2, json!({})).await;
    let response = w
        .app
        .post(
            "/hospital-sharing/request",
            &w.h1.admin.token,
            json!({"target_hospital_id": w.h2.id, "reason": "Again"}),
        )
        .await;
    assert_error(&response, 409, "duplicate");

    // The reverse direction is a different pair.
    request(&w.app, &w.h2, &w.h1, json!({})).await;

    // The requester may cancel while pending; then the pair is free again.
    let response = w
        .app
        .delete(&format!("/hospital-sharing/{}", id), &w.h1.admin.token)
        .await;
    assert_status(&response, 204);
    request(&w.app, &w.h1, &w.h2, json!({})).await;
}

#[tokio::test]
async fn test_approval_requires_sharing_feature() {
    let app = TestApp::new().await;
    let h1 = app.hospital("North").await;
    let h2 = app.hospital("South").await;
    app.enable_sharing(&h1).await;

    let id = request(&app, &h1, &h2, json!({})).await;
    let response = app
        .post(
            &format!("/hospital-sharing/{}/approve", id),
            &app.super_admin.token,
            json!({}),
        )
        .await;
    assert_error(&response, 409, "hospitals_not_eligible");

    app.enable_sharing(&h2).await;
    approve(&app, &id).await;

    let response = app
        .post(
            &format!("/hospital-sharing/{}/approve", id),
            &app.super_admin.token,
            json!({}),
        )
        .await;
    assert_error(&response, 409, "not_pending");
}

#[tokio::test]
async fn test_patient_reads_own_records_only() {
    let w = world().await;
    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", w.h2_patient.id),
            &w.h2_patient.token,
        )
        .await;
    assert_status(&response, 200);
    assert_eq!(response.json::<Vec<Value>>().len(), 1);

    let other = w.app.patient(&w.h2, "Someone Else").await;
    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", w.h2_patient.id),
            &other.token,
        )
        .await;
    assert_error(&response, 403, "not_own_data");

    // Patients never write clinical records.
    let response = w
        .app
        .post(
            "/medical-records",
            &w.h2_patient.token,
            json!({"patient_id": w.h2_patient.id, "chief_complaint": "Self-diagnosis"}),
        )
        .await;
    assert_category(&response, "forbidden");
}

#[tokio::test]
async fn test_department_staff_denied_record_reads() {
    let w = world().await;
    let lab = w.app.department(&w.h2, "Laboratory").await;

    let response = w
        .app
        .get(
            &format!("/medical-records/patient/{}", w.h2_patient.id),
            &lab.staff.token,
        )
        .await;
    assert_error(&response, 403, "department_staff_record_access");
}
