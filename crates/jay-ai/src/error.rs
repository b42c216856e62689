//! Error types for jay-ai

use std::time::Duration;
use thiserror::Error;

/// Result type alias using jay-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when requesting a completion
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// 429, with the server's `retry-after` in seconds when it sent one
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("invalid or missing API key")]
    InvalidApiKey,

    /// The generation did not finish within its wall-clock limit
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("generation aborted")]
    Aborted,

    /// The event stream broke off or carried garbage
    #[error("stream error: {0}")]
    Sse(String),

    /// A well-formed reply without the fields a completion needs
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether a second attempt at the same request could succeed.
    ///
    /// Local servers answer 503 while a model is still loading, so any
    /// 5xx counts, as do 408 and 425.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_redirect(),
            Error::RateLimited { .. }
            | Error::Sse(_)
            | Error::Timeout(_)
            | Error::UnexpectedResponse(_) => true,
            Error::Api { status, .. } => *status >= 500 || matches!(status, 408 | 425),
            Error::Json(_) | Error::InvalidApiKey | Error::Aborted | Error::InvalidConfig(_) => false,
        }
    }
}
