//! Conflict retries
//!
//! Units of work that lose an optimistic concurrency race are re-run from the
//! start with exponential backoff. Only errors reporting a conflict are
//! retried; anything else is returned immediately.

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable as _};
use tracing::{debug, warn};

/// Errors that may succeed on a fresh attempt.
pub trait Retryable {
    /// Whether the failure was a lost optimistic concurrency race.
    fn is_conflict(&self) -> bool;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f32,
    /// Randomise each delay to spread out competing writers.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits between attempts.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Backoff between attempts; yields one delay per retry.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let retries = self.max_attempts.saturating_sub(1);

        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(usize::try_from(retries).unwrap_or(usize::MAX));

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `operation` until it succeeds, fails without a conflict, or attempts run out.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry_on_conflict<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let result = operation
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|error: &E| error.is_conflict())
        .notify(|error: &E, delay: Duration| {
            debug!(?delay, %error, "retrying after conflict");
        })
        .await;

    if let Err(error) = &result
        && error.is_conflict()
    {
        warn!(max_attempts = policy.max_attempts, %error, "conflict retries exhausted");
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use backon::BackoffBuilder;
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error, PartialEq)]
    enum TestError {
        #[error("conflict")]
        Conflict,
        #[error("fatal")]
        Fatal,
    }

    impl Retryable for TestError {
        fn is_conflict(&self) -> bool {
            matches!(self, Self::Conflict)
        }
    }

    #[test]
    fn delays_grow_and_saturate() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
            multiplier: 2.0,
            jitter: false,
        };

        let delays: Vec<Duration> = policy.backoff().build().collect();

        assert_eq!(delays.len(), 4, "one delay per retry");
        assert_eq!(delays.first(), Some(&Duration::from_millis(10)));
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "delays never shrink");
        assert_eq!(delays.last(), Some(&Duration::from_millis(35)), "capped");
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = &AtomicU32::new(0);

        let result = retry_on_conflict(&RetryPolicy::immediate(3), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Conflict)
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "two conflicts then success");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry_on_conflict(&RetryPolicy::immediate(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);

            Err(TestError::Conflict)
        })
        .await;

        assert_eq!(result, Err(TestError::Conflict));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry_on_conflict(&RetryPolicy::immediate(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);

            Err(TestError::Fatal)
        })
        .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
