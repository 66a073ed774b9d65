//! Multipart file extractor.

use axum::{
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header::CONTENT_TYPE},
};
use carenet_persistence::DocumentStore;
use tracing::debug;

use crate::error::RestError;
use crate::state::AppState;
use crate::uploads::Upload;

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

/// The `file` part of a `multipart/form-data` request.
///
/// Type and size checks happen in [`Upload::validate`]; this extractor only
/// reads the part. Other parts are ignored.
#[derive(Debug, Clone)]
pub struct FileUpload(pub Upload);

impl<S> FromRequest<AppState<S>> for FileUpload
where
    S: DocumentStore + 'static,
{
    type Rejection = RestError;

    async fn from_request(req: Request, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        let limit = state.config().max_upload_size;
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|_| RestError::UnsupportedMediaType { content_type })?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| map_multipart_error(e, limit))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| map_multipart_error(e, limit))?;
            debug!(file_name = %file_name, content_type = %content_type, size = data.len(), "Received upload");
            return Ok(FileUpload(Upload {
                file_name,
                content_type,
                data,
            }));
        }

        Err(RestError::validation_code(
            "missing_file",
            format!("Multipart field '{}' is required", FILE_FIELD),
        ))
    }
}

fn map_multipart_error(error: MultipartError, limit: usize) -> RestError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RestError::PayloadTooLarge { limit }
    } else {
        RestError::validation_code("invalid_multipart", error.body_text())
    }
}
