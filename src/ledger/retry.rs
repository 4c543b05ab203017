//! Bounded retry of units of work that lost a store conflict

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::types::*;

/// Exponential backoff with jitter, limited to a fixed number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Run once, never retry
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the sleep before attempt `attempt + 1`
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        // Full jitter keeps colliding transfers from retrying in lockstep
        let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. Only retryable errors are
    /// retried; exhausting the attempts returns
    /// [`LedgerError::TransactionConflict`] carrying the attempt count.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> LedgerResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(LedgerError::TransactionConflict { reason, .. }) => {
                    if attempt >= self.max_attempts {
                        warn!(attempts = attempt, %reason, "conflict retries exhausted");
                        return Err(LedgerError::TransactionConflict {
                            attempts: attempt,
                            reason,
                        });
                    }
                    let delay = self.backoff(attempt);
                    warn!(attempt, ?delay, %reason, "conflict, retrying unit of work");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> LedgerError {
        LedgerError::TransactionConflict {
            attempts: 1,
            reason: "deadlock detected".to_string(),
        }
    }

    #[test]
    fn test_backoff_ceiling_grows_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(50));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));

        let result = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(conflict())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy::new(4, Duration::ZERO, Duration::ZERO);
        let result: LedgerResult<()> = policy.run(|_| async { Err(conflict()) }).await;

        match result {
            Err(LedgerError::TransactionConflict { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: LedgerResult<()> = RetryPolicy::default()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LedgerError::AccountNotFound(999)) }
            })
            .await;

        assert_eq!(result, Err(LedgerError::AccountNotFound(999)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let result: LedgerResult<()> = RetryPolicy::no_retry()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(conflict()) }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
