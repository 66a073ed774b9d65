//! Identity and session handlers.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::domain::UserView;
use crate::error::RestResult;
use crate::extractors::{ApiJson, AuthenticatedUser};
use crate::identity::session::{ChangePassword, LoginRequest, ProfileUpdate, RegisterUser};
use crate::identity::TokenPair;
use crate::state::AppState;

/// Body of `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// The refresh token to exchange.
    pub refresh_token: String,
}

/// Handler for self-registration.
///
/// # HTTP Request
///
/// `POST /auth/register`
///
/// # Response
///
/// - `201 Created` - The new user (patients approved, staff pending)
/// - `409 Conflict` - Email already registered
pub async fn register_handler<S>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<RegisterUser>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    debug!(email = %request.email, role = %request.role, "Processing registration");
    let user = state.sessions().register(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))).into_response())
}

/// Handler for password login.
///
/// # HTTP Request
///
/// `POST /auth/login`
///
/// # Response
///
/// - `200 OK` - Access and refresh tokens plus the user
/// - `401 Unauthorized` - Unknown email, wrong password or inactive user
pub async fn login_handler<S>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    let response = state.sessions().login(request, Utc::now()).await?;
    Ok(Json(response).into_response())
}

/// Handler for refresh token rotation.
///
/// # HTTP Request
///
/// `POST /auth/refresh`
pub async fn refresh_handler<S>(
    State(state): State<AppState<S>>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> RestResult<Json<TokenPair>>
where
    S: DocumentStore + 'static,
{
    let pair = state
        .sessions()
        .refresh(&request.refresh_token, Utc::now())
        .await?;
    Ok(Json(pair))
}

/// Handler for logout. Revokes the current refresh token.
///
/// # HTTP Request
///
/// `POST /auth/logout`
pub async fn logout_handler<S>(
    State(state): State<AppState<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> RestResult<StatusCode>
where
    S: DocumentStore + 'static,
{
    debug!(user_id = %user.id, "Processing logout request");
    state.sessions().logout(&user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/me`
pub async fn me_handler(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserView> {
    debug!(user_id = %user.id, "Processing me request");
    Json(UserView::from(&user))
}

/// `PUT /auth/me`
pub async fn update_me_handler<S>(
    State(state): State<AppState<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> RestResult<Json<UserView>>
where
    S: DocumentStore + 'static,
{
    debug!(user_id = %user.id, "Processing update me request");
    let user = state
        .sessions()
        .update_profile(&user.id, update, Utc::now())
        .await?;
    Ok(Json(UserView::from(&user)))
}

/// `PUT /auth/me/password`
pub async fn change_password_handler<S>(
    State(state): State<AppState<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(request): ApiJson<ChangePassword>,
) -> RestResult<StatusCode>
where
    S: DocumentStore + 'static,
{
    debug!(user_id = %user.id, "Processing change password request");
    state
        .sessions()
        .change_password(&user.id, request, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
