//! Bearer authentication extractors.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use carenet_persistence::DocumentStore;
use chrono::Utc;
use tracing::debug;

use crate::directory::hospital_usable;
use crate::domain::{ApprovalStatus, Role, User};
use crate::error::{AuthFailure, DenyReason, RestError};
use crate::state::AppState;

/// Returns the token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The user behind a valid access token.
///
/// Rejects with `401` when the token is missing, invalid or expired, or when
/// the user has been deactivated. No approval or tenant checks are made, so
/// this is the extractor for self-service endpoints.
///
/// # Example
///
/// ```rust,ignore
/// async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserView> {
///     Json(UserView::from(&user))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<AppState<S>> for AuthenticatedUser
where
    S: DocumentStore + 'static,
{
    type Rejection = RestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(RestError::Unauthenticated {
            reason: AuthFailure::MissingCredential,
        })?;
        let user = state.sessions().authenticate(token, Utc::now()).await?;
        Ok(AuthenticatedUser(user))
    }
}

/// An authenticated user who may act on tenant data.
///
/// On top of [`AuthenticatedUser`] this requires that the user is approved,
/// that staff roles have a hospital affiliation, and that the affiliated
/// hospital is approved with a live subscription. Super admins skip the
/// tenant checks.
#[derive(Debug, Clone)]
pub struct Actor(pub User);

impl<S> FromRequestParts<AppState<S>> for Actor
where
    S: DocumentStore + 'static,
{
    type Rejection = RestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if user.approval_status == ApprovalStatus::Pending || user.role == Role::PendingApproval {
            return Err(RestError::forbidden(DenyReason::PendingApproval));
        }
        if user.role == Role::SuperAdmin {
            return Ok(Actor(user));
        }

        match user.hospital_id.as_deref() {
            Some(hospital_id) => {
                if !hospital_usable(&state.repository(), hospital_id, Utc::now()).await? {
                    debug!(user_id = %user.id, hospital_id = %hospital_id, "Hospital not usable");
                    return Err(RestError::forbidden(DenyReason::HospitalNotUsable));
                }
            }
            None if user.role.requires_hospital() => {
                return Err(RestError::forbidden(DenyReason::NoHospitalAffiliation));
            }
            None => {}
        }

        Ok(Actor(user))
    }
}
