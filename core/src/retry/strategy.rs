//! Exponential backoff driven by backon's schedule, with cancellation and
//! status callbacks.

use backon::BackoffBuilder;
use backon::ExponentialBuilder;
use serde::Deserialize;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RetryError;
use super::classifier::RetryClassifiable;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first call; `0` disables retrying.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
    /// Stop retrying once this much time has passed since the first attempt.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            max_elapsed_ms: None,
        }
    }
}

impl RetryConfig {
    fn schedule(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(self.backoff_multiplier)
            .with_max_times(self.max_attempts as usize)
            .with_jitter()
            .build()
    }
}

/// Progress report handed to the status callback before each sleep.
#[derive(Debug, Clone)]
pub struct RetryStatus {
    /// Attempt that just failed (1-indexed).
    pub attempt: u32,
    pub elapsed: Duration,
    pub sleep: Duration,
    pub reason: String,
    pub is_rate_limit: bool,
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, exceeds `max_elapsed_ms`, or `cancel` fires.
///
/// A `suggested_backoff` on the error (e.g. `Retry-After`) replaces the
/// computed delay for that attempt.
pub async fn execute_with_backoff_cancellable<F, Fut, T, E, StatusCb>(
    mut operation: F,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut status_cb: StatusCb,
) -> super::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + RetryClassifiable,
    StatusCb: FnMut(RetryStatus),
{
    let start = Instant::now();
    let max_elapsed = config.max_elapsed_ms.map(Duration::from_millis);
    let mut schedule = config.schedule();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Aborted);
        }
        attempt += 1;

        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Aborted),
            result = operation() => match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            },
        };

        if !err.is_retryable() {
            return Err(RetryError::Permanent(err));
        }

        let Some(computed) = schedule.next() else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        };
        let suggested = err.suggested_backoff();
        let sleep = suggested.unwrap_or(computed);

        let elapsed = start.elapsed();
        if let Some(limit) = max_elapsed
            && elapsed + sleep > limit
        {
            return Err(RetryError::Timeout { elapsed, last: err });
        }

        status_cb(RetryStatus {
            attempt,
            elapsed,
            sleep,
            reason: err.to_string(),
            is_rate_limit: suggested.is_some(),
        });

        if !wait_with_cancel(sleep, cancel).await {
            return Err(RetryError::Aborted);
        }
    }
}

/// Sleep for `duration`; returns `false` when cancelled first.
async fn wait_with_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
