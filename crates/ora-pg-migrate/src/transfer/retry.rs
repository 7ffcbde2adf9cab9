//! Retry policy and operation timeouts.

use std::future::Future;
use std::time::Duration;

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};

/// Exponential backoff for failed batches.
///
/// Retry `n` (1-based) waits `base * multiplier^(n-1)`, capped at `max_delay`.
/// There is no jitter: a given policy always produces the same schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_base_ms),
            multiplier: config.retry_backoff_multiplier,
            max_delay: Duration::from_millis(config.retry_backoff_max_ms),
        }
    }

    /// No retries at all.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether a failure on attempt `attempt` (0 = first try) may be retried.
    pub fn should_retry(&self, error: &MigrateError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }
}

/// Run `fut`, turning an elapsed `timeout` into [`MigrateError::Timeout`].
pub async fn with_timeout<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::timeout(operation, timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_capped_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry_respects_budget_and_kind() {
        let policy = RetryPolicy::default();
        let violation = MigrateError::constraint("T", "duplicate key");
        assert!(policy.should_retry(&violation, 0));
        assert!(policy.should_retry(&violation, 2));
        assert!(!policy.should_retry(&violation, 3));
        assert!(!policy.should_retry(&MigrateError::conversion("C", "bad"), 0));
        assert!(!RetryPolicy::no_retry().should_retry(&violation, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_error() {
        let result: Result<()> = with_timeout(Duration::from_secs(5), "read batch", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, MigrateError::Timeout { seconds: 5, .. }));
        assert!(err.is_retryable());
    }
}
