use thiserror::Error;

/// Errors surfaced by a key-value transport.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The transport could not establish a connection.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A command reached the backend (or tried to) and failed.
    #[error("`{op}` failed: {message}")]
    Command { op: &'static str, message: String },
    /// The handle was closed locally or by the backend.
    #[error("store handle is closed")]
    Closed,
    /// No client could be obtained for the requested connection.
    #[error("store `{0}` is unavailable")]
    Unavailable(String),
    /// The connection URL could not be used by any transport.
    #[error("unsupported store url `{url}`: {reason}")]
    UnsupportedUrl { url: String, reason: String },
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            op,
            message: message.into(),
        }
    }

    pub fn unsupported_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
