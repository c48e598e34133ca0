//! Retry logic with bounded backoff.
//!
//! `retry_async` drives an operation until it succeeds, the retry predicate
//! rejects the error, or the attempt budget runs out. Delays between attempts
//! come from the policy's `Backoff`:
//! - Exponential: `min(initial * factor^n, max)` for the HTTP layer and reconnects
//! - Linear: `min(initial * (n + 1), max)` for the RPC poll loop
//!
//! No sleep happens after the final attempt or after a non-retryable error.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Multiply the delay by `factor` after each failed attempt.
    Exponential { factor: f64 },
    /// Grow the delay by `initial_delay` after each failed attempt.
    Linear,
}

/// Retry policy. Pure configuration, no state between invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear policy: `attempts` tries, waiting `interval * (n + 1)` after try `n`.
    pub fn linear(attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: interval,
            max_delay: Duration::MAX,
            backoff: Backoff::Linear,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Switch to exponential backoff with the given factor.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff = Backoff::Exponential { factor };
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay that follows failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let raw_secs = match self.backoff {
            Backoff::Exponential { factor } => initial * factor.powi(attempt as i32),
            Backoff::Linear => initial * f64::from(attempt + 1),
        };
        let capped_secs = raw_secs.min(self.max_delay.as_secs_f64());

        // try_from guards against infinities when factor^attempt overflows
        Duration::try_from_secs_f64(capped_secs).unwrap_or(self.max_delay)
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Whether the loop stopped because the attempt budget ran out.
    pub exhausted: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation with backoff.
///
/// # Arguments
///
/// * `policy` - Attempt budget and delay schedule
/// * `operation` - Async function that returns a Result
/// * `should_retry` - Predicate to determine if an error is retryable
///
/// # Returns
///
/// A tuple of (Result, RetryStats). A zero attempt budget still makes one attempt.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!("Error is not retryable: {}", err);
            return (Err(err), stats);
        }

        if attempt + 1 >= max_attempts {
            stats.exhausted = true;
            warn!(
                "All {} retry attempts exhausted. Last error: {}",
                max_attempts, err
            );
            return (Err(err), stats);
        }

        let delay = policy.delay_for_attempt(attempt);
        stats.total_delay += delay;

        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            max_attempts,
            err,
            delay
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
