use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::ErrorReport;
use crate::infra::http::api::state::ApiState;

/// Connection manager status; 503 unless a store connection is active.
pub async fn health(State(state): State<ApiState>) -> Response {
    let status = state.store.status();
    if status.ready {
        return (StatusCode::OK, Json(status)).into_response();
    }

    let detail = if status.configured {
        format!("store not ready (phase {:?})", status.phase)
    } else {
        "no store configured".to_string()
    };
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response();
    ErrorReport::from_message(
        "infra::http::health",
        StatusCode::SERVICE_UNAVAILABLE,
        detail,
    )
    .attach(&mut response);
    response
}
