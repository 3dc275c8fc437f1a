//! Cache administration handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::cache::{CacheError, CacheStats};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{
    CacheHealthResponse, InvalidateRequest, InvalidateResponse,
};
use crate::infra::http::api::state::ApiState;

pub async fn cache_stats(State(state): State<ApiState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

pub async fn cache_health(State(state): State<ApiState>) -> Response {
    let store = state.store.status();
    let healthy = store.ready;
    let body = CacheHealthResponse {
        enabled: state.cache.config().enabled,
        healthy,
        store,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

pub async fn clear_cache(
    State(state): State<ApiState>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let deleted = state.cache.clear_all().await.map_err(cache_to_api)?;
    info!(deleted, "response cache cleared");
    Ok(Json(InvalidateResponse {
        pattern: "*".to_string(),
        deleted,
    }))
}

pub async fn invalidate_cache(
    State(state): State<ApiState>,
    payload: Result<Json<InvalidateRequest>, JsonRejection>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::bad_request("Invalid request body", Some(rejection.body_text()))
    })?;
    let pattern = request
        .pattern
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request(
                "Pattern is required",
                Some("send {\"pattern\": \"<namespace>\"}".to_string()),
            )
        })?;

    let deleted = state
        .cache
        .invalidate(&pattern)
        .await
        .map_err(cache_to_api)?;
    info!(namespace = %pattern, deleted, "cache namespace invalidated");
    Ok(Json(InvalidateResponse { pattern, deleted }))
}

fn cache_to_api(err: CacheError) -> ApiError {
    ApiError::store_unavailable(err.to_string())
}
