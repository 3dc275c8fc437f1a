//! Cache configuration.
//!
//! Built from the validated `[cache]` settings; see `config::CacheSettings`.

use std::time::Duration;

// Default values for cache configuration
const DEFAULT_VERSION: &str = "v1";
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_STALE_THRESHOLD_SECS: u64 = 60;
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_LOCK_WAIT_MS: u64 = 100;
const DEFAULT_LOCK_WAIT_ATTEMPTS: u32 = 3;
const DEFAULT_INVALIDATE_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Runtime cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and fill the response cache at all.
    pub enabled: bool,
    /// Version tag embedded in every key; bumping it orphans old entries.
    pub version: String,
    /// TTL used when a route does not pick its own policy.
    pub default_ttl: Duration,
    /// Entries with less remaining lifetime than this are served stale and refreshed.
    pub stale_threshold: Duration,
    /// Lifetime of the fill lock.
    pub lock_ttl: Duration,
    /// First wait of a lock loser before re-reading; doubles on each retry.
    pub lock_wait: Duration,
    /// Re-reads a lock loser performs before computing without the cache.
    pub lock_wait_attempts: u32,
    /// Keys deleted per round trip during invalidation.
    pub invalidate_batch_size: usize,
    /// Pre-populate hot entries at startup.
    pub warm_on_startup: bool,
    /// Responses larger than this are passed through uncached.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: DEFAULT_VERSION.to_string(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            lock_wait_attempts: DEFAULT_LOCK_WAIT_ATTEMPTS,
            invalidate_batch_size: DEFAULT_INVALIDATE_BATCH_SIZE,
            warm_on_startup: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            version: settings.version.clone(),
            default_ttl: settings.default_ttl,
            stale_threshold: settings.stale_threshold,
            lock_ttl: settings.lock_ttl,
            lock_wait: settings.lock_wait,
            lock_wait_attempts: settings.lock_wait_attempts,
            invalidate_batch_size: settings.invalidate_batch_size.get(),
            warm_on_startup: settings.warm_on_startup,
            max_body_bytes: settings.max_body_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Policy built from the configured default TTL and stale threshold.
    pub fn default_policy(&self) -> CachePolicy {
        CachePolicy::new(self.default_ttl, self.stale_threshold)
    }

    /// Sleep before the `attempt`-th re-read (0-based): `lock_wait * 2^attempt`.
    pub fn lock_wait_for(&self, attempt: u32) -> Duration {
        self.lock_wait.saturating_mul(1_u32 << attempt.min(16))
    }
}

/// Per-route freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub stale_threshold: Duration,
}

impl CachePolicy {
    pub const BRANDS: Self = Self::from_secs(3600, 300);
    pub const MODELS: Self = Self::from_secs(1800, 180);
    pub const MODEL_DETAILS: Self = Self::from_secs(1800, 180);
    pub const SEARCH: Self = Self::from_secs(1800, 180);

    pub const fn new(ttl: Duration, stale_threshold: Duration) -> Self {
        Self {
            ttl,
            stale_threshold,
        }
    }

    pub const fn from_secs(ttl: u64, stale_threshold: u64) -> Self {
        Self::new(
            Duration::from_secs(ttl),
            Duration::from_secs(stale_threshold),
        )
    }
}
