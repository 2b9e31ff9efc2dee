//! Connection manager configuration.
//!
//! Plain values only: the binary resolves these from files, environment and
//! flags, and library callers construct them directly.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// What `with_timeout` does when an operation cannot complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Log and hand the caller an empty result.
    #[default]
    Degrade,
    /// Log and return the error.
    Strict,
}

impl FailureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Degrade => "degrade",
            Self::Strict => "strict",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown failure mode `{other}` (expected degrade|strict)")),
        }
    }
}

/// Settings shared by every connection a manager owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// URL used when `get_client` is not given one.
    pub default_url: Option<String>,
    /// Budget for a single connect attempt.
    pub connect_timeout: Duration,
    /// Total connect attempts before giving up.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n * retry_base_delay` before the next.
    pub retry_base_delay: Duration,
    /// Default budget for `with_timeout`.
    pub operation_timeout: Duration,
    pub mode: FailureMode,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            mode: FailureMode::Degrade,
        }
    }
}

impl ManagerConfig {
    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = Some(url.into());
        self
    }

    pub fn with_mode(mut self, mode: FailureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Linear backoff before the attempt after `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_base_delay.saturating_mul(attempt)
    }
}

/// Per-call overrides for `get_client`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}
