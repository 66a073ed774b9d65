//! Sharing Ledger handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::directory::ReasonBody;
use crate::domain::HospitalSharing;
use crate::error::RestResult;
use crate::extractors::{Actor, ApiJson, ApiQuery};
use crate::sharing::{SharingFilter, SharingRequest};
use crate::state::AppState;

/// Body of `POST /hospital-sharing/{id}/approve`.
#[derive(Debug, Default, Deserialize)]
pub struct ApproveSharing {
    /// Overrides the requested expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Handler for filing a sharing request.
///
/// # HTTP Request
///
/// `POST /hospital-sharing/request` (hospital admin of the requesting hospital)
///
/// # Response
///
/// - `201 Created` - The pending request
/// - `409 Conflict` - A record for this hospital pair already exists, or a
///   hospital is not approved
pub async fn request_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<SharingRequest>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing request sharing request");
    let record = state.sharing().request(&actor, request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// `GET /hospital-sharing?status=`
pub async fn list_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiQuery(filter): ApiQuery<SharingFilter>,
) -> RestResult<Json<Vec<HospitalSharing>>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing list sharing request");
    Ok(Json(state.sharing().list(&actor, &filter).await?))
}

/// `GET /hospital-sharing/{id}`
pub async fn read_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<HospitalSharing>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read sharing request");
    Ok(Json(state.sharing().get(&actor, &id).await?))
}

/// `POST /hospital-sharing/{id}/approve` (super admin)
pub async fn approve_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ApproveSharing>,
) -> RestResult<Json<HospitalSharing>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing approve sharing request");
    let record = state
        .sharing()
        .approve(&actor, &id, body.expires_at, Utc::now())
        .await?;
    Ok(Json(record))
}

/// `POST /hospital-sharing/{id}/reject` (super admin)
pub async fn reject_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReasonBody>,
) -> RestResult<Json<HospitalSharing>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing reject sharing request");
    let record = state
        .sharing()
        .reject(&actor, &id, body.reason, Utc::now())
        .await?;
    Ok(Json(record))
}

/// `POST /hospital-sharing/{id}/revoke` (super admin)
pub async fn revoke_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReasonBody>,
) -> RestResult<Json<HospitalSharing>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing revoke sharing request");
    let record = state
        .sharing()
        .revoke(&actor, &id, body.reason, Utc::now())
        .await?;
    Ok(Json(record))
}

/// Handler for withdrawing a pending request.
///
/// # HTTP Request
///
/// `DELETE /hospital-sharing/{id}`
pub async fn cancel_sharing_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<StatusCode>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing cancel sharing request");
    state.sharing().cancel(&actor, &id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
