//! Development-mode error detail.
//!
//! Internal errors never expose their cause to clients. In development the
//! cause is useful, so this middleware re-renders `500` responses carrying
//! an [`InternalDetail`] with an extra `error.detail` field.

use axum::{
    Json,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::InternalDetail;

/// Middleware function adding `error.detail` to internal errors.
///
/// This can be used with `axum::middleware::from_fn`.
pub async fn error_detail_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(InternalDetail(detail)) = response.extensions().get::<InternalDetail>().cloned()
    else {
        return response;
    };

    let body = serde_json::json!({
        "error": {
            "category": "internal",
            "code": "internal_error",
            "message": "An internal error occurred",
            "detail": detail,
        }
    });
    (response.status(), Json(body)).into_response()
}
