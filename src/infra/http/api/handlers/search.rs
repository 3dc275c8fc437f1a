use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::{info, warn};

use crate::infra::http::api::error::{ApiError, codes};
use crate::infra::http::api::models::{SearchInvalidateResponse, SearchQuery};
use crate::infra::http::api::state::ApiState;
use crate::search::{BuildOutcome, IndexStats, SearchIndex, SearchResults};

/// Answers from the index tiers, or scans the catalog when neither can.
pub async fn search_models(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResults>, ApiError> {
    let Some(raw) = query.q.as_deref() else {
        return Err(ApiError::bad_request(
            "Missing search query",
            Some("pass the query as ?q=".to_string()),
        ));
    };
    let limit = state.search.config().effective_limit(query.limit);

    if let Some(results) = state.search.search(raw, limit).await {
        return Ok(Json(results));
    }
    let results = SearchIndex::full_scan(state.catalog.as_ref(), raw, limit).await?;
    Ok(Json(results))
}

pub async fn search_stats(State(state): State<ApiState>) -> Json<IndexStats> {
    Json(state.search.stats())
}

pub async fn invalidate_search(
    State(state): State<ApiState>,
) -> Result<Json<SearchInvalidateResponse>, ApiError> {
    let rebuilt = state.search.invalidate().await;

    // Cached /api/search responses were computed from the old index.
    match state.cache.invalidate("search").await {
        Ok(deleted) => info!(deleted, "cached search responses purged"),
        Err(err) => warn!(error = %err, "failed to purge cached search responses"),
    }

    let outcome = rebuilt.map_err(|err| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::INDEX_BUILD,
            "Search index rebuild failed",
            Some(err.to_string()),
        )
    })?;

    let body = match outcome {
        BuildOutcome::Built { documents, .. } => SearchInvalidateResponse {
            rebuilt: true,
            documents,
        },
        BuildOutcome::Skipped => SearchInvalidateResponse {
            rebuilt: false,
            documents: state.search.stats().document_count,
        },
    };
    Ok(Json(body))
}
