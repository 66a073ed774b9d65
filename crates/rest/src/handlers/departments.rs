//! Department handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use tracing::debug;

use crate::departments::{CreateDepartment, DepartmentUpdate};
use crate::domain::Department;
use crate::error::RestResult;
use crate::extractors::{Actor, ApiJson};
use crate::state::AppState;

/// Handler for department creation.
///
/// # HTTP Request
///
/// `POST /departments` (hospital admin)
///
/// # Response
///
/// - `201 Created` - The department
/// - `409 Conflict` - Code already used in this hospital
pub async fn create_department_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<CreateDepartment>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, "Processing create department request");
    let department = state
        .departments()
        .create(&actor, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(department)).into_response())
}

/// `GET /departments/{id}`
pub async fn read_department_handler<S>(
    State(state): State<AppState<S>>,
    Actor(_actor): Actor,
    Path(id): Path<String>,
) -> RestResult<Json<Department>>
where
    S: DocumentStore + 'static,
{
    debug!(id = %id, "Processing read department request");
    Ok(Json(state.departments().get(&id).await?))
}

/// `PUT /departments/{id}` (hospital admin)
pub async fn update_department_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<DepartmentUpdate>,
) -> RestResult<Json<Department>>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing update department request");
    let department = state
        .departments()
        .update(&actor, &id, update, Utc::now())
        .await?;
    Ok(Json(department))
}

/// Handler for department removal.
///
/// # HTTP Request
///
/// `DELETE /departments/{id}` (hospital admin)
///
/// # Response
///
/// - `204 No Content` - Department deactivated
/// - `409 Conflict` - Active staff are still assigned
pub async fn delete_department_handler<S>(
    State(state): State<AppState<S>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> RestResult<StatusCode>
where
    S: DocumentStore + 'static,
{
    debug!(actor_id = %actor.id, id = %id, "Processing delete department request");
    state.departments().delete(&actor, &id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
