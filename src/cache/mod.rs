//! Response cache.
//!
//! Entries live in the remote store as gzip-compressed JSON under
//! `cache:<version>:<namespace>:<path>:<query-json>`. Reads are served fresh, stale
//! (with a background refresh), or after a short wait on another caller's fill.
//!
//! ```toml
//! [cache]
//! enabled = true
//! version = "v1"
//! stale_threshold_seconds = 60
//! # ... see config.rs for all options
//! ```

mod config;
mod error;
mod keys;
mod lock;
mod middleware;
mod response;
mod service;
mod warmer;

pub use config::{CacheConfig, CachePolicy};
pub use error::CacheError;
pub use keys::{
    CacheKey, KEY_PREFIX, LOCK_PREFIX, canonical_query, namespace_for_path, namespace_pattern,
    version_pattern,
};
pub use lock::{FillLock, LockOutcome};
pub use middleware::{CacheState, response_cache_layer};
pub use response::{CachedResponse, X_CACHE, X_CACHE_TTL};
pub use service::{CacheStats, CacheStatus, Cached, ResponseCache};
pub use warmer::{BRANDS_PATH, CacheWarmer, MODELS_PATH, POPULAR_QUERY, WarmError, WarmReport};
