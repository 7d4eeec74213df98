//! Error type shared by every component of the reconciliation core.

use std::time::Duration;
use thiserror::Error;

use crate::retry::ErrorClass;
use crate::retry::PermanentError;
use crate::retry::RetryClassifiable;
use crate::retry::RetryError;
use crate::retry::RetryableError;

pub type Result<T> = std::result::Result<T, SheetsError>;

#[derive(Debug, Error)]
pub enum SheetsError {
    /// Spreadsheet or tab does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The tab exists but cannot be read as header + records.
    #[error("malformed tab: {0}")]
    Malformed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("column index {0} is beyond the last addressable column")]
    ColumnOutOfRange(usize),

    /// The resolved append row was written by someone else before commit.
    #[error("row {row} was filled before the append could be committed")]
    AppendConflict { row: u32 },

    /// The selected record no longer matches the live sheet.
    #[error("row {row} changed since it was loaded; reload and re-select")]
    StaleRecord { row: u32 },

    #[error("batch update failed for {ranges} range(s): {reason}; reload and re-verify the sheet")]
    BatchFailed { ranges: usize, reason: String },

    #[error("phase registry error: {0}")]
    Registry(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("operation cancelled")]
    Cancelled,
}

impl SheetsError {
    pub fn registry(err: impl std::fmt::Display) -> Self {
        SheetsError::Registry(err.to_string())
    }
}

impl RetryClassifiable for SheetsError {
    fn classify(&self) -> ErrorClass {
        match self {
            SheetsError::RateLimited { retry_after } => {
                ErrorClass::Retryable(RetryableError::RateLimitExceeded {
                    retry_after_secs: retry_after.map(|d| d.as_secs()).unwrap_or(0),
                })
            }
            SheetsError::Upstream { status, .. } if *status >= 500 => {
                ErrorClass::Retryable(RetryableError::ServiceUnavailable(*status))
            }
            SheetsError::Network(err) if err.is_timeout() => {
                ErrorClass::Retryable(RetryableError::NetworkTimeout)
            }
            SheetsError::Network(err) if err.is_connect() || err.is_request() => {
                ErrorClass::Retryable(RetryableError::ConnectionFailed)
            }
            SheetsError::NotFound(what) => {
                ErrorClass::Permanent(PermanentError::ResourceNotFound(what.clone()))
            }
            SheetsError::AccessDenied(what) => {
                ErrorClass::Permanent(PermanentError::AccessDenied(what.clone()))
            }
            SheetsError::AuthFailed(msg) => {
                ErrorClass::Permanent(PermanentError::AuthenticationFailed(msg.clone()))
            }
            SheetsError::InvalidInput(msg) | SheetsError::Malformed(msg) => {
                ErrorClass::Permanent(PermanentError::InvalidInput(msg.clone()))
            }
            _ => ErrorClass::Permanent(PermanentError::Other(self.to_string())),
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        match self {
            SheetsError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<RetryError<SheetsError>> for SheetsError {
    fn from(err: RetryError<SheetsError>) -> Self {
        err.into_last().unwrap_or(SheetsError::Cancelled)
    }
}

/// Parse a `Retry-After` header given in seconds, clamped to 1..=120s.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.clamp(1, 120)))
}
