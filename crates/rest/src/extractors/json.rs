//! JSON body extractor.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::{StatusCode, header::CONTENT_TYPE},
};
use carenet_persistence::DocumentStore;
use serde::de::DeserializeOwned;

use crate::error::RestError;
use crate::state::AppState;

/// A JSON request body whose rejections render in the API error envelope.
///
/// Malformed or mistyped bodies become `validation/invalid_json`, bodies over
/// the configured limit become `413`, and non-JSON content types become `415`.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<AppState<S>> for ApiJson<T>
where
    S: DocumentStore + 'static,
    T: DeserializeOwned,
{
    type Rejection = RestError;

    async fn from_request(req: Request, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(map_rejection(
                rejection,
                content_type,
                state.config().max_body_size,
            )),
        }
    }
}

fn map_rejection(rejection: JsonRejection, content_type: String, limit: usize) -> RestError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => RestError::UnsupportedMediaType { content_type },
        other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            RestError::PayloadTooLarge { limit }
        }
        other => RestError::validation_code("invalid_json", other.body_text()),
    }
}
