use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Why a single connect attempt failed.
#[derive(Debug, Clone, Error)]
pub enum AttemptFailure {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AttemptFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors surfaced by the connection manager.
///
/// Cloneable so one single-flight outcome can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("connection `{name}` failed after {attempts} attempt(s): {last}")]
    Exhausted {
        name: String,
        attempts: u32,
        #[source]
        last: AttemptFailure,
    },
    #[error("`{operation}` on `{name}` timed out after {timeout:?}")]
    OperationTimeout {
        name: String,
        operation: String,
        timeout: Duration,
    },
    #[error("`{operation}` on `{name}` failed: {source}")]
    Operation {
        name: String,
        operation: String,
        source: StoreError,
    },
    #[error("connection `{name}` was closed while connecting")]
    Superseded { name: String },
}
