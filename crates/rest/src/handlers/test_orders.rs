//! Test order handlers.
//!
//! Every transition is a compare-and-swap on the stored order, so two
//! concurrent transitions of the same order yield one success and one
//! `409 concurrent_modification`.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::domain::{TestOrder, TestResult};
use crate::error::RestResult;
use crate::extractors::{Actor, ApiJson, ApiQuery, FileUpload, PageQuery};
use crate::records::DownloadLink;
use crate::state::AppState;
use crate::test_orders::{
    CancelOrder, CreateTestOrder, MarkPaid, PaymentFailure, QueueFilter, UploadResult,
};

/// Response of `PUT /test-orders/{id}/upload-result`.
#[derive(Debug, Serialize)]
pub struct ResultUploaded {
    /// The completed order.
    pub order: TestOrder,
    /// The created result.
    pub result: TestResult,
}

/// Handler for ordering a test.
///
/// # HTTP Request
///
/// `POST /test-orders` (doctor)
///
/// # Response
///
/// - `201 Created` - The order, `payment_pending` or `ready_for_test`
/// - `403 Forbidden` - Not a doctor, or a department of another hospital
/// - `409 Conflict` - The department's hospital is not usable
pub async fn create_test_order_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<CreateTestOrder>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing create test order request");
    let order = state
        .test_orders()
        .create(&actor, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

/// `GET /test-orders/{id}`
pub async fn read_test_order_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read test order request");
    Ok(Json(state.test_orders().get(&actor, &id, Utc::now()).await?))
}

/// `GET /test-orders/patient/{patient_id}`
pub async fn patient_test_orders_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(patient_id): Path<String>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<TestOrder>>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        patient_id = %patient_id,
        "Processing patient test orders request"
    );
    let orders = state
        .test_orders()
        .for_patient(&actor, &patient_id, pagination, Utc::now())
        .await?;
    Ok(Json(orders))
}

/// Handler for a department's work queue.
///
/// # HTTP Request
///
/// `GET /test-orders/department/{department_id}?status=`
pub async fn department_queue_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(department_id): Path<String>,
    ApiQuery(filter): ApiQuery<QueueFilter>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<TestOrder>>>
where
    S: DocumentStore + 'static,
{
    debug!(
        actor_id = %actor.id,
        department_id = %department_id,
        "Processing department queue request"
    );
    let orders = state
        .test_orders()
        .department_queue(&actor, &department_id, filter, pagination)
        .await?;
    Ok(Json(orders))
}

/// `PUT /test-orders/{id}/mark-paid`
pub async fn mark_paid_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<MarkPaid>,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing mark paid request");
    let order = state
        .test_orders()
        .mark_paid(&actor, &id, request, Utc::now())
        .await?;
    Ok(Json(order))
}

/// `PUT /test-orders/{id}/mark-payment-failed`
pub async fn mark_payment_failed_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<PaymentFailure>,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing mark payment failed request");
    let order = state
        .test_orders()
        .mark_payment_failed(&actor, &id, request, Utc::now())
        .await?;
    Ok(Json(order))
}

/// Handler for starting a test.
///
/// # HTTP Request
///
/// `PUT /test-orders/{id}/start` (department staff of the order's department)
///
/// # Response
///
/// - `200 OK` - The order, now `in_progress`
/// - `409 Conflict` - `payment_required` when payment is outstanding,
///   `invalid_state` from any other status
pub async fn start_test_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing start test request");
    Ok(Json(state.test_orders().start(&actor, &id, Utc::now()).await?))
}

/// Handler for uploading a result.
///
/// # HTTP Request
///
/// `PUT /test-orders/{id}/upload-result`
///
/// Creates the test result and completes the order.
pub async fn upload_result_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UploadResult>,
) -> RestResult<Json<ResultUploaded>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing upload result request");
    let (order, result) = state
        .test_orders()
        .upload_result(&actor, &id, request, Utc::now())
        .await?;
    Ok(Json(ResultUploaded { order, result }))
}

/// `PUT /test-orders/{id}/cancel`
pub async fn cancel_test_order_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<CancelOrder>,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing cancel test order request");
    let order = state
        .test_orders()
        .cancel(&actor, &id, request, Utc::now())
        .await?;
    Ok(Json(order))
}

/// `POST /test-orders/{id}/result-file` as `multipart/form-data`.
pub async fn attach_result_file_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    FileUpload(upload): FileUpload,
) -> RestResult<Json<TestOrder>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing attach result file request");
    let order = state
        .test_orders()
        .attach_result_file(&actor, &id, upload, Utc::now())
        .await?;
    Ok(Json(order))
}

/// `GET /test-orders/{id}/result-file` returns a presigned download link.
pub async fn result_file_link_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<DownloadLink>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing result file link request");
    let link = state
        .test_orders()
        .result_file_link(&actor, &id, Utc::now())
        .await?;
    Ok(Json(link))
}
