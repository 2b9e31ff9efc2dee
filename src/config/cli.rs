use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::cache::CacheNamespace;

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Command-line arguments for the sitecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "sitecache",
    version,
    about = "Inspect and maintain the site's versioned cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SITECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Connect to the configured store and print connection state and statistics.
    Status,
    /// List cached namespaces with their current versions and TTLs.
    Versions,
    /// Show whether a cache entry exists, its version, age and remaining TTL.
    Inspect(EntryArgs),
    /// Delete a cache entry under every version.
    Purge(EntryArgs),
    /// Probe the store periodically and log connection status until interrupted.
    Monitor(MonitorArgs),
}

#[derive(Debug, Args, Clone)]
pub struct EntryArgs {
    /// Registered cache namespace (see `versions`).
    #[arg(value_name = "NAMESPACE")]
    pub namespace: CacheNamespace,

    /// Logical key inside the namespace.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct MonitorArgs {
    /// Seconds between probes.
    #[arg(
        long = "interval-seconds",
        value_name = "SECONDS",
        default_value_t = DEFAULT_MONITOR_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_seconds: u64,
}

/// Flags that override file and environment configuration.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the store URL (`redis://…` or `memory://…`).
    #[arg(long = "store-url", value_name = "URL", global = true)]
    pub store_url: Option<String>,

    /// Override the logical connection name.
    #[arg(long = "store-connection-name", value_name = "NAME", global = true)]
    pub store_connection_name: Option<String>,

    /// Override the per-attempt connect timeout.
    #[arg(long = "store-connect-timeout-ms", value_name = "MILLIS", global = true)]
    pub store_connect_timeout_ms: Option<u64>,

    /// Override the total number of connect attempts.
    #[arg(long = "store-max-retries", value_name = "COUNT", global = true)]
    pub store_max_retries: Option<u32>,

    /// Override the base delay between connect attempts.
    #[arg(long = "store-retry-base-delay-ms", value_name = "MILLIS", global = true)]
    pub store_retry_base_delay_ms: Option<u64>,

    /// Override the per-operation timeout.
    #[arg(long = "store-operation-timeout-ms", value_name = "MILLIS", global = true)]
    pub store_operation_timeout_ms: Option<u64>,

    /// Override the failure mode (degrade|strict).
    #[arg(long = "store-mode", value_name = "MODE", global = true)]
    pub store_mode: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}
