//! Tenant Directory handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use tracing::debug;

use crate::directory::{FeatureUpdate, ReasonBody, RegisterHospital, RenewSubscription};
use crate::domain::{Department, Hospital, HospitalStats};
use crate::error::{RestError, RestResult};
use crate::extractors::{Actor, ApiJson, AuthenticatedUser, PageQuery};
use crate::state::AppState;

/// Handler for the public hospital directory.
///
/// # HTTP Request
///
/// `GET /hospitals?page=&count=`
///
/// Lists approved hospitals with an active, unexpired subscription. No
/// authentication required.
pub async fn list_hospitals_handler<S>(
    State(state): State<AppState<S>>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<Hospital>>>
where
    S: DocumentStore + 'static,
{
    debug!("Processing hospital directory request");
    Ok(Json(
        state.directory().list_usable(pagination, Utc::now()).await?,
    ))
}

/// Handler for hospital registration.
///
/// # HTTP Request
///
/// `POST /hospitals/register`
///
/// # Response
///
/// - `201 Created` - The pending hospital and its admin account
/// - `409 Conflict` - Name, registration number or email already taken
pub async fn register_hospital_handler<S>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<RegisterHospital>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(name = %request.name, "Processing hospital registration");
    let registration = state.directory().register(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

/// `GET /hospitals/pending` (super admin)
pub async fn pending_hospitals_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
) -> RestResult<Json<Vec<Hospital>>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing pending hospitals request");
    Ok(Json(state.directory().list_pending(&actor).await?))
}

/// Handler for reading one hospital.
///
/// Any authenticated user may read a hospital, including admins of a
/// hospital whose subscription has lapsed.
///
/// # HTTP Request
///
/// `GET /hospitals/{id}`
pub async fn read_hospital_handler<S>(
    State(state): State<AppState<S>>,
    AuthenticatedUser(_user): AuthenticatedUser,
    Path(id): Path<String>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(id = %id, "Processing read hospital request");
    Ok(Json(state.directory().get(&id, Utc::now()).await?))
}

/// `POST /hospitals/{id}/approve` (super admin)
pub async fn approve_hospital_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing approve hospital request");
    Ok(Json(state.directory().approve(&actor, &id, Utc::now()).await?))
}

/// `POST /hospitals/{id}/reject` (super admin)
pub async fn reject_hospital_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReasonBody>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing reject hospital request");
    let hospital = state
        .directory()
        .reject(&actor, &id, body.reason, Utc::now())
        .await?;
    Ok(Json(hospital))
}

/// `POST /hospitals/{id}/suspend` (super admin)
pub async fn suspend_hospital_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing suspend hospital request");
    Ok(Json(state.directory().suspend(&actor, &id, Utc::now()).await?))
}

/// Handler for subscription renewal.
///
/// Takes an [`AuthenticatedUser`] rather than an [`Actor`] so the admin of
/// an expired hospital can still renew.
///
/// # HTTP Request
///
/// `POST /hospitals/{id}/subscription`
pub async fn renew_subscription_handler<S>(
    State(state): State<AppState<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<RenewSubscription>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(user_id = %user.id, id = %id, "Processing renew subscription request");
    let hospital = state
        .directory()
        .renew(&user, &id, request, Utc::now())
        .await?;
    Ok(Json(hospital))
}

/// `PUT /hospitals/{id}/features`
pub async fn update_features_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<FeatureUpdate>,
) -> RestResult<Json<Hospital>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing update features request");
    let hospital = state
        .directory()
        .update_features(&actor, &id, update, Utc::now())
        .await?;
    Ok(Json(hospital))
}

/// `GET /hospitals/{id}/stats`
pub async fn hospital_stats_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<HospitalStats>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing hospital stats request");
    Ok(Json(state.directory().stats(&actor, &id, Utc::now()).await?))
}

/// Handler for a hospital's active departments.
///
/// Public, so registrants can pick a department. Hospitals that are not
/// usable answer 404.
///
/// # HTTP Request
///
/// `GET /hospitals/{id}/departments`
pub async fn hospital_departments_handler<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> RestResult<Json<Vec<Department>>>
where
    S: DocumentStore + 'static,
{
    debug!(id = %id, "Processing hospital departments request");
    if !state.directory().is_usable(&id, Utc::now()).await? {
        return Err(RestError::not_found("hospital", &id));
    }
    Ok(Json(state.departments().list(&id).await?))
}
