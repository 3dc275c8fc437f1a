//! Typed settings for the store, cache, search index and HTTP listener.
//!
//! Sources are layered file → environment → CLI flags; every raw value is validated
//! into the structs below before anything starts.

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, InvalidateArgs, ServeArgs, ServeOverrides, StoreArgs, StoreOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "motorcache";
const ENV_PREFIX: &str = "MOTORCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_CONNECT_ATTEMPTS: u64 = 3;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
const DEFAULT_BACKOFF_MAX_MS: u64 = 3_000;
const DEFAULT_CACHE_VERSION: &str = "v1";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_STALE_THRESHOLD_SECS: u64 = 60;
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_LOCK_WAIT_MS: u64 = 100;
const DEFAULT_LOCK_WAIT_ATTEMPTS: u32 = 3;
const DEFAULT_INVALIDATE_BATCH_SIZE: u64 = 100;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_SEARCH_REFRESH_SECS: u64 = 30 * 60;
const DEFAULT_SEARCH_ENTRY_TTL_SECS: u64 = 3600;
const DEFAULT_SEARCH_MIN_QUERY_LEN: usize = 1;
const DEFAULT_SEARCH_LIMIT: u64 = 20;
const DEFAULT_CATALOG_PATH: &str = "data/catalog.json";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub primary_url: Option<String>,
    pub backup_url: Option<String>,
    pub failover_enabled: bool,
    pub health_check_interval: Duration,
    pub max_connect_attempts: NonZeroU32,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub version: String,
    pub default_ttl: Duration,
    pub stale_threshold: Duration,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub lock_wait_attempts: u32,
    pub invalidate_batch_size: NonZeroUsize,
    pub warm_on_startup: bool,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub refresh_interval: Duration,
    pub entry_ttl: Duration,
    pub min_query_len: usize,
    pub default_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Resolve settings for `cli`: config files, then `MOTORCACHE__*` variables, then flags.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Reindex(args)) => raw.apply_store_args(args),
        Some(Command::Invalidate(args)) => raw.apply_store_overrides(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parse the process arguments and resolve settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
    catalog: RawCatalogSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_store_overrides(&overrides.store);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.version = Some(version.clone());
        }
        if let Some(seconds) = overrides.search_refresh_seconds {
            self.search.refresh_interval_seconds = Some(seconds);
        }
        if let Some(path) = overrides.catalog_path.as_ref() {
            self.catalog.path = Some(path.clone());
        }
    }

    fn apply_store_args(&mut self, args: &StoreArgs) {
        self.apply_store_overrides(&args.store);
        if let Some(path) = args.catalog_path.as_ref() {
            self.catalog.path = Some(path.clone());
        }
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(url) = overrides.primary_url.as_ref() {
            self.store.primary_url = Some(url.clone());
        }
        if let Some(url) = overrides.backup_url.as_ref() {
            self.store.backup_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.failover_enabled {
            self.store.failover_enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            search,
            catalog,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            search: build_search_settings(search)?,
            catalog: build_catalog_settings(catalog)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let primary_url = non_empty(store.primary_url);
    let backup_url = non_empty(store.backup_url);
    for (key, url) in [
        ("store.primary_url", primary_url.as_deref()),
        ("store.backup_url", backup_url.as_deref()),
    ] {
        if let Some(url) = url {
            validate_store_url(key, url)?;
        }
    }

    let health_check_interval = positive_secs(
        store
            .health_check_interval_seconds
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
        "store.health_check_interval_seconds",
    )?;
    let max_connect_attempts = non_zero_u32(
        store
            .max_connect_attempts
            .unwrap_or(DEFAULT_MAX_CONNECT_ATTEMPTS),
        "store.max_connect_attempts",
    )?;
    let connect_timeout = positive_millis(
        store.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        "store.connect_timeout_ms",
    )?;
    let command_timeout = positive_millis(
        store.command_timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
        "store.command_timeout_ms",
    )?;
    let backoff_base = positive_millis(
        store.backoff_base_ms.unwrap_or(DEFAULT_BACKOFF_BASE_MS),
        "store.backoff_base_ms",
    )?;
    let backoff_max = positive_millis(
        store.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS),
        "store.backoff_max_ms",
    )?;
    if backoff_max < backoff_base {
        return Err(LoadError::invalid(
            "store.backoff_max_ms",
            "must not be smaller than store.backoff_base_ms",
        ));
    }

    Ok(StoreSettings {
        primary_url,
        backup_url,
        failover_enabled: store.failover_enabled.unwrap_or(false),
        health_check_interval,
        max_connect_attempts,
        connect_timeout,
        command_timeout,
        backoff_base,
        backoff_max,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let version = cache
        .version
        .unwrap_or_else(|| DEFAULT_CACHE_VERSION.to_string());
    if version.is_empty() || version.contains(':') {
        return Err(LoadError::invalid(
            "cache.version",
            "must be non-empty and must not contain `:`",
        ));
    }

    let default_ttl = positive_secs(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;
    let stale_threshold = Duration::from_secs(
        cache
            .stale_threshold_seconds
            .unwrap_or(DEFAULT_STALE_THRESHOLD_SECS),
    );
    if stale_threshold >= default_ttl {
        return Err(LoadError::invalid(
            "cache.stale_threshold_seconds",
            "must be smaller than cache.default_ttl_seconds",
        ));
    }

    let lock_ttl = positive_secs(
        cache.lock_ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECS),
        "cache.lock_ttl_seconds",
    )?;
    let lock_wait = positive_millis(
        cache.lock_wait_ms.unwrap_or(DEFAULT_LOCK_WAIT_MS),
        "cache.lock_wait_ms",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        version,
        default_ttl,
        stale_threshold,
        lock_ttl,
        lock_wait,
        lock_wait_attempts: cache
            .lock_wait_attempts
            .unwrap_or(DEFAULT_LOCK_WAIT_ATTEMPTS),
        invalidate_batch_size: non_zero_usize(
            cache
                .invalidate_batch_size
                .unwrap_or(DEFAULT_INVALIDATE_BATCH_SIZE),
            "cache.invalidate_batch_size",
        )?,
        warm_on_startup: cache.warm_on_startup.unwrap_or(true),
        max_body_bytes: non_zero_usize(
            cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            "cache.max_body_bytes",
        )?,
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    Ok(SearchSettings {
        refresh_interval: positive_secs(
            search
                .refresh_interval_seconds
                .unwrap_or(DEFAULT_SEARCH_REFRESH_SECS),
            "search.refresh_interval_seconds",
        )?,
        entry_ttl: positive_secs(
            search
                .entry_ttl_seconds
                .unwrap_or(DEFAULT_SEARCH_ENTRY_TTL_SECS),
            "search.entry_ttl_seconds",
        )?,
        min_query_len: search
            .min_query_len
            .unwrap_or(DEFAULT_SEARCH_MIN_QUERY_LEN),
        default_limit: non_zero_usize(
            search.default_limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            "search.default_limit",
        )?,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let path = catalog
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("catalog.path", "path must not be empty"));
    }
    Ok(CatalogSettings { path })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    primary_url: Option<String>,
    backup_url: Option<String>,
    failover_enabled: Option<bool>,
    health_check_interval_seconds: Option<u64>,
    max_connect_attempts: Option<u64>,
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    version: Option<String>,
    default_ttl_seconds: Option<u64>,
    stale_threshold_seconds: Option<u64>,
    lock_ttl_seconds: Option<u64>,
    lock_wait_ms: Option<u64>,
    lock_wait_attempts: Option<u32>,
    invalidate_batch_size: Option<u64>,
    warm_on_startup: Option<bool>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    refresh_interval_seconds: Option<u64>,
    entry_ttl_seconds: Option<u64>,
    min_query_len: Option<usize>,
    default_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn validate_store_url(key: &'static str, value: &str) -> Result<(), LoadError> {
    let url = url::Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))?;
    match url.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
