//! Coordination store errors

use thiserror::Error;

/// Errors that can occur when talking to the coordination store
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an error status
    #[error("Store API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes were not valid base64/UTF-8
    #[error("Invalid encoding: {0}")]
    Encoding(String),

    /// No endpoint could be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Unavailable(_) | Self::Timeout(_))
    }
}
