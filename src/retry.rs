//! Retry logic with a session-wide attempt budget
//!
//! A producer gets one [`RetryBudget`] for its whole session. Failed attempts
//! while sizing the result set are subtracted from what the download loop may
//! spend later: with 20 configured attempts and 3 failures during
//! `fetch_initial_data`, the loop runs with 17.
//!
//! # Example
//!
//! ```no_run
//! use scap_feed::config::RetryConfig;
//! use scap_feed::retry::{IsRetryable, RetryBudget, retry_with_budget};
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let mut budget = RetryBudget::new(config.attempts);
//! let _total = retry_with_budget(&config, &mut budget, || async {
//!     Ok::<_, MyError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Only upstream fetch failures are retried; 4xx are caller bugs
            Error::Fetch(e) => e.is_retryable(),
            // Destination writes are never retried by the pipeline
            Error::Database(_) | Error::Sqlx(_) | Error::Io(_) => false,
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::Validation { .. }
            | Error::InvalidItem(_)
            | Error::Cancelled
            | Error::Other(_) => false,
        }
    }
}

/// Attempt budget shared by all retried operations of one producer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
    failures: u32,
}

impl RetryBudget {
    /// Budget allowing `attempts` tries in total (at least one)
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            failures: 0,
        }
    }

    /// Number of attempts configured for the session
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of failed attempts so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Attempts still available to the next phase, counting its first try
    pub fn remaining(&self) -> u32 {
        self.attempts.saturating_sub(self.failures)
    }

    /// Record a failure if another attempt is still allowed afterwards
    fn try_consume(&mut self) -> bool {
        if self.failures + 1 < self.attempts {
            self.failures += 1;
            true
        } else {
            false
        }
    }
}

/// Execute an async operation, retrying retryable failures while the budget lasts
///
/// Each failed attempt consumes one unit of `budget`. With the default
/// [`RetryConfig`] the next attempt starts immediately; a non-zero
/// `initial_delay` enables exponential backoff capped at `max_delay`.
///
/// # Returns
///
/// The successful result, the first non-retryable error, or the last
/// retryable error once the budget is exhausted.
pub async fn retry_with_budget<F, Fut, T, E>(
    config: &RetryConfig,
    budget: &mut RetryBudget,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut retried = false;

    loop {
        match operation().await {
            Ok(result) => {
                if retried {
                    tracing::info!(
                        failures = budget.failures(),
                        attempts = budget.attempts(),
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && budget.try_consume() => {
                retried = true;

                tracing::warn!(
                    error = %e,
                    attempt = budget.failures() + 1,
                    attempts = budget.attempts(),
                    delay_ms = delay.as_millis(),
                    "Request failed, retrying"
                );

                if !delay.is_zero() {
                    let wait = if config.jitter {
                        add_jitter(delay)
                    } else {
                        delay
                    };
                    tokio::time::sleep(wait).await;

                    let next_delay =
                        Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                    delay = next_delay.min(config.max_delay);
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = budget.attempts(),
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Request failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter between 0% and 100% of the delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
