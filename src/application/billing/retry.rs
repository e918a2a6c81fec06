//! Retry executor with exponential backoff for gateway calls.
//!
//! Wraps a fallible async operation and re-runs it on transient failures.
//! The backoff is an awaited `tokio::time::sleep`, so a waiting retry only
//! suspends the calling task.
//!
//! # Example
//!
//! ```ignore
//! let executor = RetryExecutor::new(RetryPolicy::default());
//! let result = executor
//!     .run("process_payment", || gateway.process_payment(&request, &key))
//!     .await?;
//! ```
//!
//! Operations run through the executor may execute more than once, so they
//! must be safe to repeat (charges carry an idempotency key for this).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::ports::PaymentError;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every further failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, saturating at
    /// `Duration::MAX`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Errors that know whether repeating the operation could help.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for PaymentError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Runs operations under a `RetryPolicy`.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached.
    ///
    /// The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + fmt::Display,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "operation failed with non-retryable error"
                    );
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    error!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
