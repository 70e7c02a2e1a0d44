use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use taskbridge_core::classify::ErrorClassifier;

use crate::error::PlatformError;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before re-invoking after the failure of 0-based attempt `i`:
    /// `min(base * multiplier^i, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Bounded-effort retry for outbound Platform calls. Makes at most
/// `max_retries + 1` invocations, and only re-invokes operations the caller
/// marked idempotent with verdicts classified as retryable.
pub struct RetryExecutor {
    config: RetryConfig,
    classifier: Arc<ErrorClassifier>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, classifier: Arc<ErrorClassifier>) -> Self {
        Self { config, classifier }
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        idempotent: bool,
        mut operation: F,
    ) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            event_name = "retry_recovered",
                            operation = operation_name,
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let verdict = self.classifier.classify(&error.to_raw_failure());
                    let out_of_budget = attempt >= self.config.max_retries;
                    if !idempotent || !verdict.action.is_retryable() || out_of_budget {
                        if out_of_budget && idempotent && verdict.action.is_retryable() {
                            warn!(
                                event_name = "retry_exhausted",
                                operation = operation_name,
                                attempts = attempt + 1,
                                "all retry attempts exhausted"
                            );
                        }
                        return Err(error);
                    }

                    let delay = self.config.delay_for(attempt);
                    debug!(
                        event_name = "retry_scheduled",
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use taskbridge_core::classify::ClassifierThresholds;

    use super::*;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(ErrorClassifier::new(ClassifierThresholds::default())),
        )
    }

    fn refused() -> PlatformError {
        // Shapes like a connect failure so the classifier maps it to a
        // retryable network verdict.
        PlatformError::Decode {
            endpoint: "/social-tasks".to_owned(),
            message: "connect ECONNREFUSED 10.0.0.1".to_owned(),
        }
    }

    fn bad_request() -> PlatformError {
        PlatformError::Status {
            endpoint: "/social-tasks".to_owned(),
            status: 400,
            message: "missing title".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_the_backoff_curve() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(3), Duration::from_secs(8));
        assert_eq!(config.delay_for(10), Duration::from_secs(30), "capped at max delay");
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_get_four_attempts() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute("list-tasks", true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4, "max_retries + 1 invocations");
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_mid_sequence_stops_retrying() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("list-tasks", true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(refused())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("recovers"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_operations_run_once() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute("create-task", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_verdicts_run_once() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute("create-task", true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(bad_request()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
