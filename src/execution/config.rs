use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ExponentialBackoff;
use crate::types::error::{SyncError, SyncResult};

/// Order coordinator configuration.
///
/// # Example
///
/// ```rust
/// use order_reconciler::execution::CoordinatorConfig;
///
/// let config = CoordinatorConfig::default()
///     .with_poll_interval_ms(50)
///     .with_ambiguous_wait_ms(1_000)
///     .with_worker_pool_size(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Safety-net poll interval while waiting, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long an ambiguous placement waits for the mirror, in milliseconds.
    pub ambiguous_wait_ms: u64,
    /// Retries of transient cancel/query failures.
    pub max_transient_retries: u32,
    /// Concurrent REST calls per coordinator.
    pub worker_pool_size: usize,
    /// Longest wait for rate budget, in milliseconds.
    pub max_rate_wait_ms: u64,
    /// Sleep between denied rate checks, in milliseconds.
    pub rate_retry_interval_ms: u64,
    /// First transient retry delay, in milliseconds.
    pub retry_backoff_base_ms: u64,
    /// Longest transient retry delay, in milliseconds.
    pub retry_backoff_max_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            ambiguous_wait_ms: 5_000,
            max_transient_retries: 3,
            worker_pool_size: 16,
            max_rate_wait_ms: 10_000,
            rate_retry_interval_ms: 50,
            retry_backoff_base_ms: 100,
            retry_backoff_max_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the ambiguous-placement wait.
    #[must_use]
    pub fn with_ambiguous_wait_ms(mut self, ms: u64) -> Self {
        self.ambiguous_wait_ms = ms;
        self
    }

    /// Sets the transient retry count.
    #[must_use]
    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Sets the rate wait bound and retry interval.
    #[must_use]
    pub fn with_rate_wait_ms(mut self, max_wait_ms: u64, retry_ms: u64) -> Self {
        self.max_rate_wait_ms = max_wait_ms;
        self.rate_retry_interval_ms = retry_ms;
        self
    }

    /// Sets the transient retry backoff bounds.
    #[must_use]
    pub fn with_retry_backoff_ms(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_backoff_base_ms = base_ms;
        self.retry_backoff_max_ms = max_ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfiguration` for a zero poll interval or
    /// an empty worker pool.
    pub fn validate(&self) -> SyncResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfiguration(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(SyncError::InvalidConfiguration(
                "worker_pool_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn ambiguous_wait(&self) -> Duration {
        Duration::from_millis(self.ambiguous_wait_ms)
    }

    pub(crate) fn max_rate_wait(&self) -> Duration {
        Duration::from_millis(self.max_rate_wait_ms)
    }

    pub(crate) fn rate_retry_interval(&self) -> Duration {
        Duration::from_millis(self.rate_retry_interval_ms.max(1))
    }

    pub(crate) fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_backoff_base_ms),
            Duration::from_millis(self.retry_backoff_max_ms),
            0.1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.ambiguous_wait(), Duration::from_secs(5));
        assert_eq!(config.max_transient_retries, 3);
        assert_eq!(config.worker_pool_size, 16);
    }

    #[test]
    fn test_validate() {
        assert!(CoordinatorConfig::default().validate().is_ok());
        assert!(
            CoordinatorConfig::default()
                .with_worker_pool_size(0)
                .validate()
                .is_err()
        );
        assert!(
            CoordinatorConfig::default()
                .with_poll_interval_ms(0)
                .validate()
                .is_err()
        );
    }
}
