//! Response cache middleware.
//!
//! Wraps read-only routes in `ResponseCache::get_cached_or_compute`, so concurrent
//! misses for the same URL run the handler once and near-expiry entries are refreshed
//! in the background.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use tracing::instrument;

use super::{CachePolicy, CachedResponse, ResponseCache};

#[derive(Clone)]
pub struct CacheState {
    pub cache: ResponseCache,
    /// Route policy; `None` falls back to the configured default.
    pub policy: Option<CachePolicy>,
}

impl CacheState {
    pub fn new(cache: ResponseCache, policy: CachePolicy) -> Self {
        Self {
            cache,
            policy: Some(policy),
        }
    }

    pub fn with_default_policy(cache: ResponseCache) -> Self {
        Self {
            cache,
            policy: None,
        }
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = state
        .cache
        .key_for(request.uri().path(), request.uri().query());
    let policy = state
        .policy
        .unwrap_or_else(|| state.cache.config().default_policy());
    let max_body = state.cache.config().max_body_bytes;

    // GET bodies are ignored, so the request can be replayed for background refreshes.
    let (parts, _body) = request.into_parts();
    let compute = move || {
        let request = Request::from_parts(parts.clone(), Body::empty());
        let next = next.clone();
        async move { CachedResponse::capture(next.run(request).await, max_body).await }
    };

    match state
        .cache
        .get_cached_or_compute(&key, policy, compute)
        .await
    {
        Ok(cached) => cached.value.into_response(cached.status, cached.ttl),
        Err(passthrough) => passthrough,
    }
}
