//! Huginn error types

use std::time::Duration;

/// Huginn error types
///
/// Errors are `Clone` because the most recent data-source failure is kept in
/// [`EngineState`](crate::EngineState) and handed to `on_error` callbacks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HuginnError {
    // Data-source errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("data source timed out after {0:?}")]
    Timeout(Duration),

    #[error("data source error: {0}")]
    Source(String),

    /// The request was cancelled before it resolved.
    ///
    /// Not a failure: the engine drops cancelled results without touching
    /// its state or firing callbacks.
    #[error("request cancelled")]
    Cancelled,

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HuginnError {
    /// Convenience constructor for an opaque data-source failure.
    pub fn source(message: impl Into<String>) -> Self {
        HuginnError::Source(message.into())
    }

    /// Whether this error is a cancellation notice rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HuginnError::Cancelled)
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Used for logging only; `retry()` is always driven by the consumer.
    pub fn is_transient(&self) -> bool {
        match self {
            HuginnError::Http(_) | HuginnError::Timeout(_) => true,
            HuginnError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<toml::de::Error> for HuginnError {
    fn from(err: toml::de::Error) -> Self {
        HuginnError::Configuration(err.to_string())
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
