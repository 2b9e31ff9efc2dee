use thiserror::Error;

use crate::{config::LoadError, connection::ConnectionError, infra::error::InfraError};

/// Failures that end a `sitecache` invocation.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("store is not configured; set `store.url` or pass --store-url")]
    StoreDisabled,
}

