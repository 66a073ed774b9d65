//! Presigned file download handler.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use carenet_persistence::DocumentStore;
use serde::Deserialize;
use tracing::debug;

use crate::error::{DenyReason, RestError, RestResult};
use crate::extractors::ApiQuery;
use crate::state::AppState;

/// Signature parameters of a presigned URL.
#[derive(Debug, Deserialize)]
pub struct Presigned {
    expires: Option<i64>,
    signature: Option<String>,
}

/// Handler for presigned downloads.
///
/// The URL itself is the credential, so no bearer token is required.
///
/// # HTTP Request
///
/// `GET /files/{*key}?expires=&signature=`
///
/// # Response
///
/// - `200 OK` - The file with its content type
/// - `403 Forbidden` - Missing, forged or expired signature
/// - `404 Not Found` - No such file
pub async fn download_file_handler<S>(
    State(state): State<AppState<S>>,
    Path(key): Path<String>,
    ApiQuery(params): ApiQuery<Presigned>,
) -> RestResult<Response>
where
    S: DocumentStore + 'static,
{
    let (Some(expires), Some(signature)) = (params.expires, params.signature) else {
        return Err(RestError::forbidden(DenyReason::InvalidSignature));
    };
    debug!(key = %key, "Serving presigned file");

    let blob = state.blobs().fetch(&key, expires, &signature).await?;
    Ok((
        [
            (header::CONTENT_TYPE, blob.content_type.to_string()),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        blob.data,
    )
        .into_response())
}
