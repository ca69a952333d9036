//! `Pagination` query extractor, mirroring the teacher's
//! `PaginationQuery -> Pagination` conversion but against this appliance's
//! own `(page, pageSize)` convention (spec.md §4.2: "pagination with page ≥ 1,
//! pageSize ∈ [1,100]") rather than a zero-based offset.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::constants::database::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::Error;

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl From<PaginationQuery> for Pagination {
    fn from(query: PaginationQuery) -> Self {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Pagination { page, page_size }
    }
}

impl<S> FromRequestParts<S> for Pagination
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<PaginationQuery>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::Validation(format!("invalid pagination parameters: {e}")))?;
        Ok(query.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamps() {
        let p: Pagination = PaginationQuery { page: None, page_size: None }.into();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);

        let p: Pagination = PaginationQuery { page: Some(0), page_size: Some(10_000) }.into();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, MAX_PAGE_SIZE);
    }
}
