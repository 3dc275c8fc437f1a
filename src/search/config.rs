use std::time::Duration;

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_ENTRY_TTL_SECS: u64 = 3600;
const DEFAULT_MIN_QUERY_LEN: usize = 1;
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;
const DEFAULT_DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Period of the scheduled rebuild.
    pub refresh_interval: Duration,
    /// Expiry of every mirrored key.
    pub entry_ttl: Duration,
    /// Shorter (normalized) queries return no results.
    pub min_query_len: usize,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Keys deleted per round trip when clearing the mirror.
    pub delete_batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            entry_ttl: Duration::from_secs(DEFAULT_ENTRY_TTL_SECS),
            min_query_len: DEFAULT_MIN_QUERY_LEN,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
        }
    }
}

impl From<&crate::config::SearchSettings> for SearchConfig {
    fn from(settings: &crate::config::SearchSettings) -> Self {
        Self {
            refresh_interval: settings.refresh_interval,
            entry_ttl: settings.entry_ttl,
            min_query_len: settings.min_query_len,
            default_limit: settings.default_limit.get(),
            ..Self::default()
        }
    }
}

impl SearchConfig {
    /// Requested limit, defaulted and clamped to `1..=max_limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}
