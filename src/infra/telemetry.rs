//! Logging and metric descriptions for the binary.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .compact()
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the crate emits.
///
/// Safe to call more than once; only the first call registers.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "sitecache_connection_connect_total",
            Unit::Count,
            "Total number of store connections established."
        );
        describe_counter!(
            "sitecache_connection_connect_failure_total",
            Unit::Count,
            "Total number of failed store connect attempts."
        );
        describe_counter!(
            "sitecache_connection_disconnect_total",
            Unit::Count,
            "Total number of store connections closed or lost."
        );
        describe_counter!(
            "sitecache_connection_error_total",
            Unit::Count,
            "Total number of errors reported by open store connections."
        );
        describe_counter!(
            "sitecache_connection_timeout_total",
            Unit::Count,
            "Total number of connect attempts and operations that timed out."
        );
        describe_histogram!(
            "sitecache_connection_connect_ms",
            Unit::Milliseconds,
            "Time to establish a store connection, retries included, in milliseconds."
        );
        describe_counter!(
            "sitecache_cache_hit_total",
            Unit::Count,
            "Total number of versioned cache hits."
        );
        describe_counter!(
            "sitecache_cache_miss_total",
            Unit::Count,
            "Total number of versioned cache misses, labelled by reason."
        );
        describe_counter!(
            "sitecache_cache_heal_total",
            Unit::Count,
            "Total number of stale or invalid cache entries deleted on read."
        );
        describe_counter!(
            "sitecache_cache_write_total",
            Unit::Count,
            "Total number of versioned cache writes, labelled by result."
        );
    });
}
