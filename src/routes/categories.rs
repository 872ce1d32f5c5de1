use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::gate::response::api_paginated;
use crate::gate::ApiError;
use crate::AppState;

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    per_page: Option<String>,
}

impl PageQuery {
    /// Lenient parsing: anything missing or unparseable falls back to the
    /// default; `per_page` is clamped to `1..=MAX_PER_PAGE`.
    pub fn resolve(&self) -> (u64, u64) {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.parse::<u64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let per_page = self
            .per_page
            .as_deref()
            .and_then(|p| p.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

/// `GET /api/v1/categories`
pub async fn list_categories(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| {
        log::debug!("Rejected categories query: {}", e);
        ApiError::bad_request("Invalid query parameters")
    })?;
    let (page, per_page) = query.resolve();
    let (categories, total) = state.catalog.list_categories(page, per_page).await?;
    Ok(api_paginated(categories, total, page, per_page))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, per_page: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(String::from),
            per_page: per_page.map(String::from),
        }
    }

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(PageQuery::default().resolve(), (1, DEFAULT_PER_PAGE));
        assert_eq!(query(Some("3"), Some("5")).resolve(), (3, 5));
        assert_eq!(query(Some("0"), Some("0")).resolve(), (1, 1));
        assert_eq!(query(Some("x"), Some("1000")).resolve(), (1, MAX_PER_PAGE));
        assert_eq!(query(Some("-2"), Some("abc")).resolve(), (1, DEFAULT_PER_PAGE));
    }
}
