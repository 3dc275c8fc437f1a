//! Serializable HTTP response snapshot stored in the cache.

use axum::{
    body::{Body, HttpBody},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE, TRANSFER_ENCODING},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CacheStatus;

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_TTL: &str = "x-cache-ttl";

const SKIPPED_HEADERS: [HeaderName; 3] = [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedResponse {
    /// Snapshot of a JSON body as a handler would have produced it.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> serde_json::Result<Self> {
        Ok(Self {
            status: status.as_u16(),
            headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
            body: serde_json::to_string(value)?,
        })
    }

    /// Buffer a handler response for caching.
    ///
    /// Responses that must not be shared (errors, cookies, streams, oversized or
    /// non-UTF-8 bodies) come back as `Err` with the response intact.
    pub async fn capture(response: Response, max_body: usize) -> Result<Self, Response> {
        if !is_cacheable(&response, max_body) {
            return Err(response);
        }

        let (parts, body) = response.into_parts();
        let hint = body.size_hint();
        if u64::try_from(max_body).is_ok_and(|max| hint.lower() > max) {
            return Err(Response::from_parts(parts, body));
        }
        // Unknown lengths are buffered in full so the response survives even when it
        // turns out too large to cache.
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to buffer response body");
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };
        if bytes.len() > max_body {
            return Err(Response::from_parts(parts, Body::from(bytes)));
        }
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(_) => return Err(Response::from_parts(parts, Body::from(bytes))),
        };

        let headers = parts
            .headers
            .iter()
            .filter(|(name, _)| !SKIPPED_HEADERS.contains(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();

        Ok(Self {
            status: parts.status.as_u16(),
            headers,
            body,
        })
    }

    /// Rebuild the response, tagging it with how it was served.
    pub fn into_response(self, status: CacheStatus, ttl: Option<u64>) -> Response {
        let code = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (code, self.body).into_response();
        let headers = response.headers_mut();
        headers.remove(CONTENT_TYPE);
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        headers.insert(X_CACHE, HeaderValue::from_static(status.as_header()));
        if let Some(ttl) = ttl {
            headers.insert(X_CACHE_TTL, HeaderValue::from(ttl));
        }
        response
    }
}

fn is_cacheable(response: &Response, max_body: usize) -> bool {
    let headers = response.headers();
    response.status().is_success()
        && !headers.contains_key(SET_COOKIE)
        && !is_event_stream(headers)
        && declared_length(headers).is_none_or(|len| len <= max_body)
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
