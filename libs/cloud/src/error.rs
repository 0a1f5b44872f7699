//! Provider error classification.
//!
//! Every adapter maps its vendor's error encoding onto this taxonomy so
//! the lifecycle orchestrator can decide retry/abort behavior without
//! knowing which vendor it is talking to:
//!
//! - `Auth`: credential missing or rejected. Fatal, never retried.
//! - `NotFound`: resource absent. Fatal for get, already-satisfied for destroy.
//! - `Transient`: timeouts, throttling, 5xx. Eligible for bounded retry
//!   inside polling windows only.
//! - `Api`: any other vendor rejection (validation, quota). Fatal.

use thiserror::Error;

/// Errors surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Credential missing or rejected by the provider.
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// Resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, throttling, or provider 5xx.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable provider rejection.
    #[error("provider API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

impl CloudError {
    /// Classify an HTTP error response by status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            404 => Self::NotFound(body),
            429 => Self::Transient(body),
            s if s >= 500 => Self::Transient(body),
            s => Self::Api { status: s, body },
        }
    }

    /// True for errors that a bounded polling loop may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// True when a destroy may treat the error as already-satisfied.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures (connect refused, timeout, DNS) are
        // all retry-eligible; the caller's bounds decide how long.
        Self::Transient(err.to_string())
    }
}
