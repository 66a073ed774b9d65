//! User administration and patient lookup handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::directory::ReasonBody;
use crate::domain::{User, UserView};
use crate::error::RestResult;
use crate::extractors::{Actor, ApiJson, ApiQuery, PageQuery};
use crate::state::AppState;
use crate::users::UserFilter;

/// Query of `GET /patients/search`.
#[derive(Debug, Deserialize)]
pub struct PatientSearch {
    /// Matched against name, email and phone.
    #[serde(default)]
    pub q: String,
}

fn views(users: &[User]) -> Vec<UserView> {
    users.iter().map(UserView::from).collect()
}

/// `GET /users?role=&page=&count=`
pub async fn list_users_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiQuery(filter): ApiQuery<UserFilter>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<UserView>>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing list users request");
    let users = state.users().list(&actor, filter, pagination).await?;
    Ok(Json(views(&users)))
}

/// Handler for the staff approval queue.
///
/// # HTTP Request
///
/// `GET /users/pending`
///
/// Hospital admins see their own hospital's queue, super admins see all.
pub async fn pending_users_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
) -> RestResult<Json<Vec<UserView>>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing pending users request");
    let users = state.users().pending(&actor).await?;
    Ok(Json(views(&users)))
}

/// `GET /users/{id}`
pub async fn read_user_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<UserView>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing read user request");
    let user = state.users().get(&actor, &id).await?;
    Ok(Json(UserView::from(&user)))
}

/// `POST /users/{id}/approve`
pub async fn approve_user_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<UserView>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing approve user request");
    let user = state.users().approve(&actor, &id, Utc::now()).await?;
    Ok(Json(UserView::from(&user)))
}

/// `POST /users/{id}/reject`
pub async fn reject_user_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReasonBody>,
) -> RestResult<Json<UserView>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing reject user request");
    let user = state
        .users()
        .reject(&actor, &id, body.reason, Utc::now())
        .await?;
    Ok(Json(UserView::from(&user)))
}

/// `DELETE /users/{id}` deactivates the user.
pub async fn deactivate_user_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<StatusCode>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing deactivate user request");
    state.users().deactivate(&actor, &id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for patient search within the caller's hospital.
///
/// # HTTP Request
///
/// `GET /patients/search?q=`
pub async fn search_patients_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiQuery(search): ApiQuery<PatientSearch>,
    PageQuery(pagination): PageQuery,
) -> RestResult<Json<Vec<UserView>>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing search patients request");
    let patients = state
        .users()
        .search_patients(&actor, &search.q, pagination)
        .await?;
    Ok(Json(views(&patients)))
}
