//! Bounded retry with exponential backoff for transient upstream failures.
//!
//! Only errors classified as [`ErrorClass::Retryable`] are retried. Every
//! sleep between attempts races the caller's cancellation token.

pub mod classifier;
pub mod strategy;

pub use classifier::{ErrorClass, PermanentError, RetryClassifiable, RetryableError};
pub use strategy::{RetryConfig, RetryStatus, execute_with_backoff_cancellable};

use std::time::Duration;

pub type Result<T, E> = std::result::Result<T, RetryError<E>>;

/// Outcome of a retry loop that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("permanent error (not retried): {0}")]
    Permanent(E),

    #[error("retry timeout after {elapsed:?}: {last}")]
    Timeout { elapsed: Duration, last: E },

    #[error("retry aborted by cancellation")]
    Aborted,
}

impl<E: std::error::Error> RetryError<E> {
    /// The last underlying error, if an attempt ever ran to completion.
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::Permanent(last)
            | RetryError::Timeout { last, .. } => Some(last),
            RetryError::Aborted => None,
        }
    }
}
