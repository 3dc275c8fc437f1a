use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the motorcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "motorcache",
    version,
    about = "Caching and search layer for the car catalog API"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MOTORCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Rebuild the search index and its remote mirror once, then exit.
    Reindex(StoreArgs),
    /// Delete every cached response of a namespace (e.g. `brands`), then exit.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the primary store URL (e.g. redis://127.0.0.1:6379).
    #[arg(long = "store-primary-url", value_name = "URL")]
    pub primary_url: Option<String>,

    /// Override the backup store URL.
    #[arg(long = "store-backup-url", value_name = "URL")]
    pub backup_url: Option<String>,

    /// Toggle failover to the backup store.
    #[arg(
        long = "store-failover",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub failover_enabled: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Override the catalog file.
    #[arg(long = "catalog-path", value_name = "PATH")]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Cache namespace: the second path segment of the cached routes.
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache key version tag.
    #[arg(long = "cache-version", value_name = "TAG")]
    pub cache_version: Option<String>,

    /// Override the search refresh interval.
    #[arg(long = "search-refresh-seconds", value_name = "SECONDS")]
    pub search_refresh_seconds: Option<u64>,

    /// Override the catalog file.
    #[arg(long = "catalog-path", value_name = "PATH")]
    pub catalog_path: Option<PathBuf>,
}
