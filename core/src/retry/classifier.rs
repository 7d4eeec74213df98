//! Error classification for retry decisions.

use std::time::Duration;

/// Top-level error classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure; retry with backoff.
    Retryable(RetryableError),

    /// Will not improve by retrying.
    Permanent(PermanentError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    #[error("network timeout")]
    NetworkTimeout,

    #[error("connection failed")]
    ConnectionFailed,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("upstream unavailable (HTTP {0})")]
    ServiceUnavailable(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermanentError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("{0}")]
    Other(String),
}

/// Implemented by every error that flows through the retry loop.
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }

    /// Upstream-provided wait, overriding the computed backoff when present.
    fn suggested_backoff(&self) -> Option<Duration>;
}
