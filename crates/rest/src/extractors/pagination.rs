//! Pagination extractor.

use axum::{extract::FromRequestParts, http::request::Parts};
use carenet_persistence::DocumentStore;
use carenet_persistence::types::Pagination;
use serde::Deserialize;

use crate::error::RestError;
use crate::extractors::ApiQuery;
use crate::state::AppState;

/// Query parameters for pagination.
#[derive(Debug, Default, Deserialize)]
struct PageParams {
    page: Option<u32>,
    count: Option<u32>,
}

/// `?page=&count=` pagination, 1-based, with the page size clamped to the
/// configured maximum.
///
/// # Example
///
/// ```rust,ignore
/// async fn list(PageQuery(pagination): PageQuery) {
///     let query = DocumentQuery::new("users").with_pagination(pagination);
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PageQuery(pub Pagination);

impl<S> FromRequestParts<AppState<S>> for PageQuery
where
    S: DocumentStore + 'static,
{
    type Rejection = RestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let ApiQuery(params) = ApiQuery::<PageParams>::from_request_parts(parts, state).await?;
        let count = state.config().page_size(params.count);
        Ok(PageQuery(Pagination::page(params.page.unwrap_or(1), count)))
    }
}
