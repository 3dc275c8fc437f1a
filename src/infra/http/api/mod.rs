pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::cache::{CachePolicy, CacheState, response_cache_layer};
use crate::infra::http::middleware::{log_responses, set_request_context};

/// Catalog, search and cache administration routes.
///
/// Read routes carry their own cache policy through `route_layer`, so admin and health
/// endpoints never reach the response cache.
pub fn build_router(state: ApiState) -> Router {
    let cache = state.cache.clone();
    let cached = move |policy: CachePolicy| {
        axum_middleware::from_fn_with_state(
            CacheState::new(cache.clone(), policy),
            response_cache_layer,
        )
    };

    Router::new()
        .route(
            "/api/brands",
            get(handlers::list_brands).route_layer(cached(CachePolicy::BRANDS)),
        )
        .route(
            "/api/models",
            get(handlers::list_models).route_layer(cached(CachePolicy::MODELS)),
        )
        .route(
            "/api/models/{id}",
            get(handlers::get_model).route_layer(cached(CachePolicy::MODEL_DETAILS)),
        )
        .route(
            "/api/search",
            get(handlers::search_models).route_layer(cached(CachePolicy::SEARCH)),
        )
        .route("/api/search/stats", get(handlers::search_stats))
        .route("/api/search/invalidate", post(handlers::invalidate_search))
        .route("/api/cache/stats", get(handlers::cache_stats))
        .route("/api/cache/health", get(handlers::cache_health))
        .route("/api/cache/clear", post(handlers::clear_cache))
        .route("/api/cache/invalidate", post(handlers::invalidate_cache))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
