//! Bounded exponential backoff for external store calls

use crate::error::{ScalerError, ScalerResult};
use crate::observability::ScalerMetrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry settings applied to each external call independently
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay
    pub max_backoff: Duration,
    /// Budget for a single attempt; exceeding it counts as transient
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt
    /// budget runs out. Only transient errors are retried.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        metrics: &ScalerMetrics,
        mut call: F,
    ) -> ScalerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScalerResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ScalerError::Transient(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.call_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    metrics.inc_retries(operation);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("describe", &ScalerMetrics::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ScalerError::Transient("throttled".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: ScalerResult<()> = fast()
            .run("register", &ScalerMetrics::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScalerError::Transient("timeout".into()))
            })
            .await;

        assert!(matches!(result, Err(ScalerError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: ScalerResult<()> = fast()
            .run("describe", &ScalerMetrics::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScalerError::NotFound("ConsumerTask".into()))
            })
            .await;

        assert!(matches!(result, Err(ScalerError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out_as_transient() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(20),
            ..fast()
        };
        let result: ScalerResult<()> = policy
            .run("rebind", &ScalerMetrics::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ScalerError::Transient(ref m)) if m.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
