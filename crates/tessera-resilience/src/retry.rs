use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::backoff::jittered_backoff;
use crate::config::RetrySettings;
use crate::error::RetrySignal;

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry budget and retryability for one call site.
pub struct RetryPolicy<E> {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    retryable: Predicate<E>,
}

impl<E: 'static> RetryPolicy<E> {
    /// Retries every error except circuit-open rejections.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            retryable: Arc::new(|_: &E| true),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_retries, settings.base_delay(), settings.max_delay())
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }
}

impl<E> RetryPolicy<E> {
    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Result of a retried call plus how it got there.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    label: Option<String>,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs and the retry counter.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    /// Run `op` until it succeeds, the error is not retryable, the error is a
    /// circuit-open rejection, or `max_retries + 1` attempts have been made.
    /// The final error is returned unmodified.
    pub async fn execute_with_retry<T, E, F, Fut>(&self, op: F, policy: &RetryPolicy<E>) -> Result<T, E>
    where
        E: RetrySignal + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_stats(op, policy).await.result
    }

    pub async fn execute_with_stats<T, E, F, Fut>(
        &self,
        mut op: F,
        policy: &RetryPolicy<E>,
    ) -> RetryOutcome<T, E>
    where
        E: RetrySignal + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let label = self.label.as_deref().unwrap_or("unlabeled");
        let max_attempts = policy.max_attempts();
        let mut total_delay = Duration::ZERO;
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        total_delay,
                    }
                }
                Err(e) => e,
            };

            let give_up =
                attempt >= max_attempts || error.is_circuit_open() || !policy.is_retryable(&error);
            if give_up {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                    total_delay,
                };
            }

            let delay = jittered_backoff(attempt, policy.base_delay, policy.max_delay);
            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            metrics::counter!("tessera_retry_attempts_total", "operation" => label.to_string())
                .increment(1);
            tokio::time::sleep(delay).await;
            total_delay += delay;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::backoff::capped_delay;
    use crate::error::CallError;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky(u32),
        Invalid,
        Open,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl RetrySignal for TestError {
        fn is_circuit_open(&self) -> bool {
            matches!(self, TestError::Open)
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy<TestError> {
        RetryPolicy::new(max_retries, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_makes_max_retries_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let outcome = RetryCoordinator::new()
            .execute_with_stats(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(TestError::Flaky(n))
                },
                &policy(3),
            )
            .await;
        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Final error, unmodified.
        assert_eq!(outcome.result.unwrap_err(), TestError::Flaky(4));

        let ceiling: Duration = (1..=3)
            .map(|k| capped_delay(k, Duration::from_millis(100), Duration::from_secs(1)))
            .sum();
        assert!(outcome.total_delay <= ceiling);
        assert!(outcome.total_delay >= ceiling / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryCoordinator::labeled("s3.get")
            .execute_with_retry(
                || async {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err(TestError::Flaky(0)),
                        _ => Ok("object"),
                    }
                },
                &policy(3),
            )
            .await;
        assert_eq!(result.unwrap(), "object");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_is_never_retried() {
        let calls = AtomicU32::new(0);
        let outcome = RetryCoordinator::new()
            .execute_with_stats(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Open)
                },
                &policy(5),
            )
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let p = policy(5).retry_if(|e| !matches!(e, TestError::Invalid));
        let result = RetryCoordinator::new()
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Invalid)
                },
                &p,
            )
            .await;
        assert_eq!(result.unwrap_err(), TestError::Invalid);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_rejections_short_circuit() {
        let p: RetryPolicy<CallError<TestError>> = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);
        let result = RetryCoordinator::new()
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(CallError::<TestError>::Open {
                        dependency: "vault".into(),
                        failure_count: 5,
                        last_failure_time: None,
                        retry_after: Duration::from_secs(1),
                    })
                },
                &p,
            )
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_retry_is_single_attempt() {
        assert_eq!(RetryPolicy::<TestError>::no_retry().max_attempts(), 1);
    }
}
