//! Bounded retry with exponential backoff for idempotent exchange reads.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use super::ExchangeError;

/// How often and how patiently a retryable call is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Jitter: each wait is drawn from `interval * (1 ± factor)`
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
            randomization_factor: backoff::default::RANDOMIZATION_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Longest a call can take with every attempt spent, when a single
    /// attempt is bounded by `per_attempt`.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let longest_wait = self
            .max_interval
            .mul_f64(1.0 + self.randomization_factor.clamp(0.0, 1.0));
        per_attempt * attempts + longest_wait * (attempts - 1)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned on exhaustion.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_randomization_factor(policy.randomization_factor.clamp(0.0, 1.0))
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    backoff::future::retry(schedule, || {
        attempt += 1;
        let current = attempt;
        let fut = op();
        async move {
            fut.await.map_err(|err| {
                if err.is_retryable() && current < max_attempts {
                    warn!(
                        call = label,
                        attempt = current,
                        max_attempts = max_attempts,
                        error = %err,
                        "Transient exchange error, retrying"
                    );
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            randomization_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_errors() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(5), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ExchangeError::Transport("connection reset by peer".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(tokio_test::assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_cap() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(4), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Unavailable("EService:Unavailable".into()))
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Auth("invalid signature".into()))
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_never_allows_zero_attempts() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[test]
    fn test_worst_case_includes_jitter() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            randomization_factor: 0.5,
        };
        // 3 attempts of 10s plus 2 waits of up to 3s
        assert_eq!(
            policy.worst_case(Duration::from_secs(10)),
            Duration::from_secs(36)
        );

        let single = RetryPolicy::new(1);
        assert_eq!(
            single.worst_case(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_finish_within_worst_case() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(2),
            randomization_factor: 0.5,
        };
        let per_attempt = Duration::from_secs(5);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = with_retry(&policy, "test", || async {
            tokio::time::sleep(per_attempt).await;
            Err(ExchangeError::Timeout)
        })
        .await;

        tokio_test::assert_err!(result);
        assert!(started.elapsed() <= policy.worst_case(per_attempt));
    }
}
