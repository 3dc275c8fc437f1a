//! Stampede-safe read-through cache.
//!
//! `get_cached_or_compute` serves fresh entries directly, serves near-expiry entries
//! immediately while refreshing them in the background, and funnels concurrent misses
//! through a fill lock so one caller computes and writes while the others wait briefly
//! and re-read. Store failures never surface to the caller: the computation simply runs
//! without the cache.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};

use crate::{
    codec,
    store::{ConnectionProvider, KeyTtl, KvConnection, StoreError, scan_delete},
};

use super::{
    CacheConfig, CachePolicy,
    error::CacheError,
    keys::{CacheKey, namespace_pattern, version_pattern},
    lock::{FillLock, LockOutcome},
};

/// How a value was obtained. Rendered into the `X-Cache` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    HitAfterWait,
    Bypass,
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
            Self::HitAfterWait => "HIT-AFTER-WAIT",
            Self::Bypass => "BYPASS",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Stale => "stale",
            Self::HitAfterWait => "hit_after_wait",
            Self::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
    /// Remaining lifetime in seconds, when known.
    pub ttl: Option<u64>,
}

impl<T> Cached<T> {
    fn new(value: T, status: CacheStatus, ttl: Option<u64>) -> Self {
        Self { value, status, ttl }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub version: String,
    pub store_ready: bool,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub hit_after_wait: u64,
    pub bypass: u64,
    /// Share of lookups answered from the cache (fresh, stale, or after waiting).
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    hit_after_wait: AtomicU64,
    bypass: AtomicU64,
}

impl CacheCounters {
    fn record(&self, status: CacheStatus) {
        let slot = match status {
            CacheStatus::Hit => &self.hits,
            CacheStatus::Miss => &self.misses,
            CacheStatus::Stale => &self.stale,
            CacheStatus::HitAfterWait => &self.hit_after_wait,
            CacheStatus::Bypass => &self.bypass,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!("motorcache_cache_lookup_total", "outcome" => status.label()).increment(1);
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    config: Arc<CacheConfig>,
    provider: Arc<dyn ConnectionProvider>,
    counters: Arc<CacheCounters>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish()
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, path: &str, query: Option<&str>) -> CacheKey {
        CacheKey::for_request(&self.config.version, path, query)
    }

    /// Return the cached value for `key`, computing (and caching) it when absent.
    ///
    /// Only `compute`'s own error is ever returned.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_cached_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        policy: CachePolicy,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Send + 'static,
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if !self.config.enabled {
            return self.bypass(compute).await;
        }
        let Some(conn) = self.provider.active_connection() else {
            debug!(cache = "response", outcome = "bypass", "store unavailable");
            return self.bypass(compute).await;
        };

        match self.read::<T>(conn.as_ref(), key).await {
            Ok(Some((value, ttl))) if is_stale(ttl, policy) => {
                self.counters.record(CacheStatus::Stale);
                debug!(
                    cache = "response",
                    outcome = "stale",
                    ttl = ttl.remaining_secs(),
                    "serving stale entry, refreshing in background"
                );
                self.spawn_refresh(conn, key.clone(), policy, compute);
                return Ok(Cached::new(value, CacheStatus::Stale, ttl.remaining_secs()));
            }
            Ok(Some((value, ttl))) => {
                self.counters.record(CacheStatus::Hit);
                debug!(cache = "response", outcome = "hit", "serving cached entry");
                return Ok(Cached::new(value, CacheStatus::Hit, ttl.remaining_secs()));
            }
            Ok(None) => {}
            Err(err) if err.is_corruption() => {
                warn!(error = %err, "discarding corrupt cache entry");
            }
            Err(err) => {
                warn!(error = %err, "cache read failed, computing without cache");
                return self.bypass(compute).await;
            }
        }

        self.fill(conn, key, policy, compute).await
    }

    /// Write `value` under `key` unconditionally. Used by the warmer.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: std::time::Duration,
    ) -> Result<(), CacheError> {
        let conn = self
            .provider
            .active_connection()
            .ok_or(StoreError::Unavailable)?;
        let payload = codec::encode_json(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        conn.set_ex(key.as_str(), &payload, ttl).await?;
        Ok(())
    }

    /// Delete every entry of `namespace` (e.g. `brands`). Returns the number removed.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, namespace: &str) -> Result<u64, CacheError> {
        let pattern = namespace_pattern(&self.config.version, namespace);
        let deleted = self.delete_matching(&pattern).await?;
        counter!("motorcache_cache_invalidated_keys_total").increment(deleted);
        info!(namespace, deleted, "cache namespace invalidated");
        Ok(deleted)
    }

    /// Delete every entry of the current version. Locks and other key families survive.
    pub async fn clear_all(&self) -> Result<u64, CacheError> {
        let pattern = version_pattern(&self.config.version);
        let deleted = self.delete_matching(&pattern).await?;
        counter!("motorcache_cache_invalidated_keys_total").increment(deleted);
        info!(version = %self.config.version, deleted, "response cache cleared");
        Ok(deleted)
    }

    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let hits = load(&self.counters.hits);
        let misses = load(&self.counters.misses);
        let stale = load(&self.counters.stale);
        let hit_after_wait = load(&self.counters.hit_after_wait);
        let bypass = load(&self.counters.bypass);

        let served = hits + stale + hit_after_wait;
        let total = served + misses + bypass;
        let hit_rate = if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        };

        CacheStats {
            version: self.config.version.clone(),
            store_ready: self.provider.is_ready(),
            hits,
            misses,
            stale,
            hit_after_wait,
            bypass,
            hit_rate,
        }
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let conn = self
            .provider
            .active_connection()
            .ok_or(StoreError::Unavailable)?;
        Ok(scan_delete(conn.as_ref(), pattern, self.config.invalidate_batch_size).await?)
    }

    async fn read<T: DeserializeOwned>(
        &self,
        conn: &dyn KvConnection,
        key: &CacheKey,
    ) -> Result<Option<(T, KeyTtl)>, CacheError> {
        let (payload, ttl) = conn.get_with_ttl(key.as_str()).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        if ttl == KeyTtl::Missing {
            return Ok(None);
        }
        let value = codec::decode_json(&payload).map_err(|source| CacheError::Corruption {
            key: key.to_string(),
            source,
        })?;
        Ok(Some((value, ttl)))
    }

    async fn write(
        &self,
        conn: &dyn KvConnection,
        key: &CacheKey,
        payload: Option<Vec<u8>>,
        policy: CachePolicy,
    ) {
        let Some(payload) = payload else {
            return;
        };
        if let Err(err) = conn.set_ex(key.as_str(), &payload, policy.ttl).await {
            warn!(key = %key, error = %err, "failed to write cache entry");
        }
    }

    async fn fill<T, E, F, Fut>(
        &self,
        conn: Arc<dyn KvConnection>,
        key: &CacheKey,
        policy: CachePolicy,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock = match FillLock::acquire(conn.as_ref(), key, self.config.lock_ttl).await {
            Ok(LockOutcome::Acquired(lock)) => lock,
            Ok(LockOutcome::Contended) => return self.wait_for_fill(conn.as_ref(), key, compute).await,
            Err(err) => {
                warn!(error = %err, "fill lock unavailable, computing without cache");
                return self.bypass(compute).await;
            }
        };

        self.counters.record(CacheStatus::Miss);
        debug!(cache = "response", outcome = "miss", "lock acquired, computing entry");
        let result = compute().await;
        let payload = result.as_ref().ok().and_then(|value| encode_entry(key, value));
        self.write(conn.as_ref(), key, payload, policy).await;
        if let Err(err) = lock.release(conn.as_ref()).await {
            warn!(error = %err, "failed to release fill lock; it will expire");
        }

        result.map(|value| Cached::new(value, CacheStatus::Miss, Some(policy.ttl.as_secs())))
    }

    /// Loser path: re-read with doubling waits, then compute without touching the cache.
    async fn wait_for_fill<T, E, F, Fut>(
        &self,
        conn: &dyn KvConnection,
        key: &CacheKey,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        for attempt in 0..self.config.lock_wait_attempts {
            tokio::time::sleep(self.config.lock_wait_for(attempt)).await;
            match self.read::<T>(conn, key).await {
                Ok(Some((value, ttl))) => {
                    self.counters.record(CacheStatus::HitAfterWait);
                    debug!(cache = "response", outcome = "hit_after_wait", attempt);
                    return Ok(Cached::new(
                        value,
                        CacheStatus::HitAfterWait,
                        ttl.remaining_secs(),
                    ));
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(error = %err, "re-read after lock wait failed");
                    break;
                }
            }
        }

        self.counters.record(CacheStatus::Miss);
        debug!(
            cache = "response",
            outcome = "miss",
            "lock holder did not fill in time, computing without cache"
        );
        compute()
            .await
            .map(|value| Cached::new(value, CacheStatus::Miss, None))
    }

    async fn bypass<T, E, F, Fut>(&self, compute: F) -> Result<Cached<T>, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.counters.record(CacheStatus::Bypass);
        compute()
            .await
            .map(|value| Cached::new(value, CacheStatus::Bypass, None))
    }

    fn spawn_refresh<T, E, F, Fut>(
        &self,
        conn: Arc<dyn KvConnection>,
        key: CacheKey,
        policy: CachePolicy,
        compute: F,
    ) where
        T: Serialize + Send + 'static,
        E: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let lock = match FillLock::acquire(conn.as_ref(), &key, cache.config.lock_ttl).await {
                Ok(LockOutcome::Acquired(lock)) => lock,
                Ok(LockOutcome::Contended) => {
                    debug!(key = %key, "refresh already in flight");
                    return;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "could not lock entry for refresh");
                    return;
                }
            };

            match compute().await {
                Ok(value) => {
                    let payload = encode_entry(&key, &value);
                    cache.write(conn.as_ref(), &key, payload, policy).await;
                    counter!("motorcache_cache_refresh_total", "result" => "ok").increment(1);
                    debug!(key = %key, "background refresh stored");
                }
                Err(_) => {
                    counter!("motorcache_cache_refresh_total", "result" => "error").increment(1);
                    debug!(key = %key, "background refresh failed, keeping stale entry");
                }
            }

            if let Err(err) = lock.release(conn.as_ref()).await {
                warn!(key = %key, error = %err, "failed to release refresh lock");
            }
        });
    }
}

fn encode_entry<T: Serialize>(key: &CacheKey, value: &T) -> Option<Vec<u8>> {
    codec::encode_json(value)
        .map_err(|err| warn!(key = %key, error = %err, "failed to encode cache entry"))
        .ok()
}

fn is_stale(ttl: KeyTtl, policy: CachePolicy) -> bool {
    match ttl {
        KeyTtl::Persistent => false,
        KeyTtl::Expires(remaining) => remaining < policy.stale_threshold,
        KeyTtl::Missing => true,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use futures::future::BoxFuture;
    use tokio::time::Instant;

    use super::*;
    use crate::store::{FixedProvider, MemoryConnection};

    fn memory_cache(config: CacheConfig) -> (ResponseCache, Arc<MemoryConnection>) {
        let conn = Arc::new(MemoryConnection::new("memory"));
        let provider = FixedProvider::new(conn.clone());
        (ResponseCache::new(config, Arc::new(provider)), conn)
    }

    fn counting(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        value: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, String>> + Clone + Send + 'static {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(value)
            })
        }
    }

    fn failing() -> impl Fn() -> BoxFuture<'static, Result<String, String>> + Clone + Send + 'static
    {
        || Box::pin(async { Err("upstream down".to_string()) })
    }

    async fn concurrent(
        cache: &ResponseCache,
        key: &CacheKey,
        callers: usize,
        compute: impl Fn() -> BoxFuture<'static, Result<String, String>> + Clone + Send + 'static,
    ) -> Vec<Cached<String>> {
        let tasks: Vec<_> = (0..callers)
            .map(|_| {
                let (cache, key, compute) = (cache.clone(), key.clone(), compute.clone());
                tokio::spawn(async move {
                    cache
                        .get_cached_or_compute(&key, CachePolicy::BRANDS, compute)
                        .await
                })
            })
            .collect();
        let mut results = Vec::with_capacity(callers);
        for task in tasks {
            results.push(task.await.expect("task").expect("compute"));
        }
        results
    }

    fn count(results: &[Cached<String>], status: CacheStatus) -> usize {
        results.iter().filter(|r| r.status == status).count()
    }

    #[tokio::test(start_paused = true)]
    async fn miss_then_hit() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "a"))
            .await
            .unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(first.ttl, Some(3600));

        let second = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "b"))
            .await
            .unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.value, "a");
        assert_eq!(second.ttl, Some(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_run_the_handler_once() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        let results = concurrent(
            &cache,
            &key,
            25,
            counting(&calls, Duration::from_millis(50), "brands"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&results, CacheStatus::Miss), 1);
        assert_eq!(count(&results, CacheStatus::HitAfterWait), 24);
        assert!(results.iter().all(|r| r.value == "brands"));
        assert!(!conn.keys().iter().any(|k| k.starts_with("lock:")));
    }

    #[tokio::test(start_paused = true)]
    async fn losers_retry_with_doubling_waits() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        // Fill finishes between the first (100ms) and second (300ms) re-read.
        let results = concurrent(
            &cache,
            &key,
            5,
            counting(&calls, Duration::from_millis(250), "brands"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&results, CacheStatus::HitAfterWait), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_winner_bounds_duplicate_work_by_loser_count() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        // Losers give up after 100 + 200 + 400ms, well before the winner finishes.
        let results = concurrent(
            &cache,
            &key,
            4,
            counting(&calls, Duration::from_secs(2), "brands"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(count(&results, CacheStatus::Miss), 4);
        assert_eq!(
            results.iter().filter(|r| r.ttl.is_some()).count(),
            1,
            "only the lock holder writes"
        );
        assert!(conn.keys().contains(&key.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_hit_returns_immediately_and_refreshes_once() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/models", Some("popular=true"));
        let policy = CachePolicy::from_secs(100, 60);

        let seed = Arc::new(AtomicUsize::new(0));
        cache
            .get_cached_or_compute(&key, policy, counting(&seed, Duration::ZERO, "old"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;

        let refreshes = Arc::new(AtomicUsize::new(0));
        let slow_refresh = counting(&refreshes, Duration::from_secs(5), "new");
        let started = Instant::now();
        for _ in 0..3 {
            let stale = cache
                .get_cached_or_compute(&key, policy, slow_refresh.clone())
                .await
                .unwrap();
            assert_eq!(stale.status, CacheStatus::Stale);
            assert_eq!(stale.value, "old");
        }
        assert_eq!(started.elapsed(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        let untouched = Arc::new(AtomicUsize::new(0));
        let fresh = cache
            .get_cached_or_compute(&key, policy, counting(&untouched, Duration::ZERO, "x"))
            .await
            .unwrap();
        assert_eq!(fresh.status, CacheStatus::Hit);
        assert_eq!(fresh.value, "new");
        assert_eq!(untouched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_stale_entry() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let policy = CachePolicy::from_secs(100, 60);
        let seed = Arc::new(AtomicUsize::new(0));
        cache
            .get_cached_or_compute(&key, policy, counting(&seed, Duration::ZERO, "old"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        let stale = cache
            .get_cached_or_compute(&key, policy, failing())
            .await
            .unwrap();
        assert_eq!(stale.status, CacheStatus::Stale);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let again = cache
            .get_cached_or_compute(&key, policy, failing())
            .await
            .unwrap();
        assert_eq!(again.value, "old");
    }

    #[tokio::test]
    async fn corrupt_entry_is_treated_as_a_miss() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        conn.set_ex(key.as_str(), b"not gzip", Duration::from_secs(300))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let result = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "ok"))
            .await
            .unwrap();
        assert_eq!(result.status, CacheStatus::Miss);

        let healed = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, failing())
            .await
            .unwrap();
        assert_eq!(healed.status, CacheStatus::Hit);
        assert_eq!(healed.value, "ok");
    }

    #[tokio::test]
    async fn unavailable_store_bypasses_without_errors() {
        let cache = ResponseCache::new(
            CacheConfig::default(),
            Arc::new(FixedProvider::unavailable()),
        );
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let result = cache
                .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "v"))
                .await
                .unwrap();
            assert_eq!(result.status, CacheStatus::Bypass);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            cache.invalidate("brands").await,
            Err(CacheError::Store(StoreError::Unavailable))
        ));
    }

    #[tokio::test]
    async fn failing_store_bypasses_without_errors() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        conn.set_available(false);
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "v"))
            .await
            .unwrap();
        assert_eq!(result.status, CacheStatus::Bypass);
        assert_eq!(result.value, "v");
    }

    #[tokio::test]
    async fn disabled_cache_never_touches_the_store() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let (cache, conn) = memory_cache(config);
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "v"))
            .await
            .unwrap();
        assert_eq!(result.status, CacheStatus::Bypass);
        assert!(conn.keys().is_empty());
    }

    #[tokio::test]
    async fn handler_errors_propagate_and_release_the_lock() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);

        let err = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, failing())
            .await
            .expect_err("handler error must surface");
        assert_eq!(err, "upstream down");
        assert!(conn.keys().is_empty());
    }

    #[tokio::test]
    async fn invalidate_is_scoped_to_a_namespace() {
        let (cache, conn) = memory_cache(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        for (path, query) in [
            ("/api/brands", None),
            ("/api/brands/tata", None),
            ("/api/models", Some("popular=true")),
        ] {
            let key = cache.key_for(path, query);
            cache
                .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "v"))
                .await
                .unwrap();
        }
        conn.set_ex("search:meta", b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.invalidate("brands").await.unwrap(), 2);
        let keys = conn.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().any(|k| k.starts_with("cache:v1:models:")));

        assert_eq!(cache.clear_all().await.unwrap(), 1);
        assert_eq!(conn.keys(), vec!["search:meta".to_string()]);
    }

    #[tokio::test]
    async fn stats_track_outcomes() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            cache
                .get_cached_or_compute(&key, CachePolicy::BRANDS, counting(&calls, Duration::ZERO, "v"))
                .await
                .unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!(stats.store_ready);
        assert_eq!(stats.version, "v1");
    }

    #[tokio::test]
    async fn put_writes_a_readable_entry() {
        let (cache, _conn) = memory_cache(CacheConfig::default());
        let key = cache.key_for("/api/brands", None);
        cache
            .put(&key, "warmed", Duration::from_secs(3600))
            .await
            .unwrap();

        let result = cache
            .get_cached_or_compute(&key, CachePolicy::BRANDS, failing())
            .await
            .unwrap();
        assert_eq!(result.status, CacheStatus::Hit);
        assert_eq!(result.value, "warmed");
    }
}
