/*!
 * Retry logic with exponential backoff
 *
 * Every attempt runs under its own timeout; an elapsed timeout counts as a
 * transient failure. Waiting between attempts is cancellable so that one
 * failed entry can stop its siblings without waiting out their backoff.
 */

use crate::backend::{BackendError, BackendResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,

    /// Timeout applied to each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.2,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay after a failed attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let multiplier = 2_u32.saturating_pow(attempt - 1);
                self.initial_delay.saturating_mul(multiplier)
            }
        };

        let capped_delay = base_delay.min(self.max_delay);

        if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter) && self.jitter_factor > 0.0
        {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            capped_delay + Duration::from_secs_f64(capped_delay.as_secs_f64() * jitter)
        } else {
            capped_delay
        }
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError {
    /// Failure was not retriable
    Permanent { attempts: u32, source: BackendError },

    /// Every attempt failed transiently
    Exhausted { attempts: u32, source: BackendError },

    /// Cancellation token fired
    Cancelled,
}

/// Execute an operation with retry logic
///
/// `operation` is called once per attempt. Retriable errors (see
/// [`BackendError::is_retriable`]) and attempt timeouts are retried until
/// `policy.max_attempts` is reached.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = timeout(policy.attempt_timeout, operation()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => BackendError::Timeout {
                operation: "attempt".to_string(),
                duration_ms: policy.attempt_timeout.as_millis() as u64,
            },
        };

        if !error.is_retriable() {
            return Err(RetryError::Permanent {
                attempts: attempt,
                source: error,
            });
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.calculate_delay(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff: BackoffStrategy::Exponential,
            jitter_factor: 0.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn network_error() -> BackendError {
        BackendError::Network {
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(200),
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..50 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast_policy(), &CancellationToken::new(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(network_error())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), &CancellationToken::new(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(network_error())
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 5, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), &CancellationToken::new(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::NotFound {
                bucket: "b".to_string(),
                key: "k".to_string(),
                backend: "memory".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(50),
            ..fast_policy()
        };
        let result: Result<(), _> = with_retry(&policy, &CancellationToken::new(), || async {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(source, BackendError::Timeout { .. }));
            }
            other => panic!("expected exhausted retries, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = with_retry(&fast_policy(), &cancel, || async { Ok(1) }).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
