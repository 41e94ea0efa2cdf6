//! Bounded retry with exponential backoff for a single unit of remote work.
//!
//! The delay after failed attempt `k` is
//! `min(base_delay * multiplier^(k-1), max_delay)` plus an optional random
//! jitter in `0..=jitter`. Errors decide for themselves whether another
//! attempt makes sense via [`Retryable`]; a non-retryable error ends the run
//! immediately without consuming the remaining attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::CoreError;
use crate::observer::{ProgressEvent, SharedObserver, TaskLabel};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay after the first failed attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1500);

/// Default growth factor between consecutive delays.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default upper bound on a single delay (before jitter).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Classifies an error as transient (worth retrying) or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Maximum random extra delay added to every wait. Zero disables it.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Reject policies that could never run or would shrink delays.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_attempts == 0 {
            return Err(CoreError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(CoreError::Configuration(format!(
                "Backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Backoff delay after failed attempt `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Backoff delay plus a random jitter in `0..=jitter`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// RetryOutcome
// ---------------------------------------------------------------------------

/// Final result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded {
        value: T,
        attempts: u32,
    },
    Failed {
        error: E,
        attempts: u32,
        /// `true` when the run stopped because the attempt budget ran out,
        /// `false` when a non-retryable error ended it early.
        exhausted: bool,
    },
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Runs operations under a [`RetryPolicy`], reporting each attempt to an
/// observer.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: SharedObserver,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, observer: SharedObserver) -> Self {
        Self { policy, observer }
    }

    /// Execute `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// Backoff sleeps happen outside `op`, so callers that take a
    /// concurrency permit inside `op` do not hold it while waiting.
    pub async fn run<F, Fut, T, E>(&self, label: &TaskLabel, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.observer.notify(&ProgressEvent::AttemptStarted {
                label: label.clone(),
                attempt,
                max_attempts,
            });

            let started = Instant::now();
            let error = match op(attempt).await {
                Ok(value) => {
                    self.observer.notify(&ProgressEvent::AttemptSucceeded {
                        label: label.clone(),
                        attempt,
                        elapsed: started.elapsed(),
                    });
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            let retryable = error.is_retryable();
            if !retryable || attempt >= max_attempts {
                self.observer.notify(&ProgressEvent::AttemptFailed {
                    label: label.clone(),
                    attempt,
                    error: error.to_string(),
                    retry_in: None,
                });
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                    exhausted: retryable,
                };
            }

            let delay = self.policy.delay_for(attempt);
            self.observer.notify(&ProgressEvent::AttemptFailed {
                label: label.clone(),
                attempt,
                error: error.to_string(),
                retry_in: Some(delay),
            });
            tokio::time::sleep(delay).await;
        }
    }
}
