use thiserror::Error;

use crate::retry::{is_retryable_http_error, should_retry_status};

#[derive(Debug, Error)]
/// Enumerates supported `BackendError` values.
pub enum BackendError {
    #[error("backend client is closed")]
    Closed,
    #[error("backend send failed after {attempts} attempt(s): {last}")]
    SendFailed { attempts: usize, last: String },
    #[error("timed out waiting for backend reply")]
    ReplyTimeout,
    #[error("backend call cancelled")]
    Cancelled,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("backend reported an error: {0}")]
    Remote(String),
    #[error("transport push failed: {0}")]
    Transport(String),
}

impl BackendError {
    /// Transport failures, 408, 429 and 5xx are transient; everything else
    /// ends the retry loop immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => is_retryable_http_error(error),
            Self::HttpStatus { status, .. } => should_retry_status(*status),
            _ => false,
        }
    }

    /// Aborts rather than fails: no fallback or retry should follow.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}
