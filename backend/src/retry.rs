use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

/// Classification consulted before spending another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Raised when a single attempt outlives its per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("attempt timed out after {0:?}")]
pub struct AttemptTimedOut(pub Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `min(initial * 2^n, max)` before retry `n` (0-based).
    Exponential { initial: Duration, max: Duration },
    /// `step * attempt` where attempt is the number of failures so far.
    Linear { step: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial, max },
            attempt_timeout: None,
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Delay slept after the `failures`-th failed attempt (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { initial, max } => {
                let exponent = failures.saturating_sub(1).min(31);
                initial
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
            Backoff::Linear { step } => step.saturating_mul(failures),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` invocations have failed. The closure receives the
    /// 0-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + From<AttemptTimedOut> + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(AttemptTimedOut(limit))),
                },
                None => operation(attempt).await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!("{} failed with non-retryable error: {}", label, err);
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                warn!("{} exhausted {} attempts: {}", label, max_attempts, err);
                return Err(err);
            }

            let delay = self.delay_after(attempt);
            warn!(
                "{} attempt {}/{} failed: {}. Retrying in {:?}",
                label, attempt, max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("permanent")]
        Permanent,
        #[error("timeout")]
        Timeout,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Permanent)
        }
    }

    impl From<AttemptTimedOut> for TestError {
        fn from(_: AttemptTimedOut) -> Self {
            TestError::Timeout
        }
    }

    #[test]
    fn exponential_delays_double_until_capped() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[test]
    fn linear_delay_grows_with_attempt_number() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(8));

        let counter = calls.clone();
        let result: Result<(), TestError> = policy
            .execute("test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(8));

        let counter = calls.clone();
        let result: Result<(), TestError> = policy
            .execute("test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Permanent)
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy =
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(8));
        let started = tokio::time::Instant::now();

        let result: Result<u32, TestError> = policy
            .execute("test", |attempt| async move {
                if attempt < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_treated_as_retryable_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::linear(2, Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_secs(30));

        let counter = calls.clone();
        let result: Result<(), TestError> = policy
            .execute("test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
