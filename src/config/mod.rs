//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::connection::{FailureMode, ManagerConfig};

pub use cli::{CliArgs, Command, EntryArgs, GlobalOverrides, MonitorArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "sitecache";
const ENV_PREFIX: &str = "SITECACHE";
const DEFAULT_CONNECTION_NAME: &str = "main";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub store: StoreSettings,
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
    /// `None` leaves the cache disabled.
    pub url: Option<String>,
    pub connection_name: String,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub operation_timeout: Duration,
    pub mode: FailureMode,
}

impl StoreSettings {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
            operation_timeout: self.operation_timeout,
            mode: self.mode,
        }
    }
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    store: RawStoreSettings,
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
    url: Option<String>,
    connection_name: Option<String>,
    connect_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
    mode: Option<String>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(name) = overrides.store_connection_name.as_ref() {
            self.store.connection_name = Some(name.clone());
        }
        if let Some(timeout) = overrides.store_connect_timeout_ms {
            self.store.connect_timeout_ms = Some(timeout);
        }
        if let Some(retries) = overrides.store_max_retries {
            self.store.max_retries = Some(retries);
        }
        if let Some(delay) = overrides.store_retry_base_delay_ms {
            self.store.retry_base_delay_ms = Some(delay);
        }
        if let Some(timeout) = overrides.store_operation_timeout_ms {
            self.store.operation_timeout_ms = Some(timeout);
        }
        if let Some(mode) = overrides.store_mode.as_ref() {
            self.store.mode = Some(mode.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, store } = raw;

        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;

        Ok(Self { logging, store })
    }
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
    let url = store.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if let Some(url) = url.as_deref() {
        url::Url::parse(url)
            .map_err(|err| LoadError::invalid("store.url", format!("failed to parse: {err}")))?;
    }

    let connection_name = store
        .connection_name
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CONNECTION_NAME.to_string());
    if connection_name.is_empty() {
        return Err(LoadError::invalid(
            "store.connection_name",
            "must not be empty",
        ));
    }

    let connect_timeout = positive_millis(
        store.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        "store.connect_timeout_ms",
    )?;
    let operation_timeout = positive_millis(
        store
            .operation_timeout_ms
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
        "store.operation_timeout_ms",
    )?;

    let max_retries = store.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    if max_retries == 0 {
        return Err(LoadError::invalid(
            "store.max_retries",
            "must be greater than zero",
        ));
    }

    let retry_base_delay = Duration::from_millis(
        store
            .retry_base_delay_ms
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
    );

    let mode = match store.mode {
        Some(mode) => FailureMode::from_str(&mode)
            .map_err(|reason| LoadError::invalid("store.mode", reason))?,
        None => FailureMode::default(),
    };

    Ok(StoreSettings {
        url,
        connection_name,
        connect_timeout,
        max_retries,
        retry_base_delay,
        operation_timeout,
        mode,
    })
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
