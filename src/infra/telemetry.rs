use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and register metric descriptions.
///
/// `RUST_LOG` directives, when present, refine the configured base level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "motorcache_store_failover_total",
            Unit::Count,
            "Switches of the active store connection, labelled by destination role."
        );
        describe_counter!(
            "motorcache_store_connect_failure_total",
            Unit::Count,
            "Failed store connection attempts, labelled by role."
        );
        describe_gauge!(
            "motorcache_store_ready",
            Unit::Count,
            "1 while a store connection is active, 0 otherwise."
        );
        describe_counter!(
            "motorcache_cache_lookup_total",
            Unit::Count,
            "Response cache lookups by outcome (hit, miss, stale, hit_after_wait, bypass)."
        );
        describe_counter!(
            "motorcache_cache_invalidated_keys_total",
            Unit::Count,
            "Cache keys removed by namespace or full invalidation."
        );
        describe_counter!(
            "motorcache_cache_refresh_total",
            Unit::Count,
            "Background refreshes of stale entries by result."
        );
        describe_counter!(
            "motorcache_cache_warm_total",
            Unit::Count,
            "Startup warm runs by result."
        );
        describe_histogram!(
            "motorcache_cache_warm_ms",
            Unit::Milliseconds,
            "Duration of a cache warm run."
        );
        describe_counter!(
            "motorcache_search_build_total",
            Unit::Count,
            "Search index builds by result."
        );
        describe_histogram!(
            "motorcache_search_build_ms",
            Unit::Milliseconds,
            "Duration of a search index build including the mirror write."
        );
        describe_gauge!(
            "motorcache_search_documents",
            Unit::Count,
            "Documents held by the in-memory search index."
        );
        describe_counter!(
            "motorcache_search_queries_total",
            Unit::Count,
            "Search queries by answering tier (memory, remote, catalog)."
        );
        describe_counter!(
            "motorcache_search_invalidations_total",
            Unit::Count,
            "Explicit search index invalidations."
        );
        describe_counter!(
            "motorcache_http_requests_total",
            Unit::Count,
            "HTTP responses by status class."
        );
        describe_histogram!(
            "motorcache_http_request_ms",
            Unit::Milliseconds,
            "HTTP request latency."
        );
    });
}
