use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ExponentialBackoff;

/// Order mirror configuration.
///
/// # Example
///
/// ```rust
/// use order_reconciler::mirror::MirrorConfig;
///
/// let config = MirrorConfig::default()
///     .with_min_eviction_threshold(4096)
///     .with_bootstrap_backoff_ms(50, 5_000);
/// assert_eq!(config.min_eviction_threshold, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Entry count below which a market is never evicted.
    pub min_eviction_threshold: usize,
    /// First retry delay of a failed bootstrap, in milliseconds.
    pub bootstrap_backoff_base_ms: u64,
    /// Longest retry delay of a failed bootstrap, in milliseconds.
    pub bootstrap_backoff_max_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            min_eviction_threshold: 2048,
            bootstrap_backoff_base_ms: 100,
            bootstrap_backoff_max_ms: 10_000,
        }
    }
}

impl MirrorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the eviction floor.
    #[must_use]
    pub fn with_min_eviction_threshold(mut self, threshold: usize) -> Self {
        self.min_eviction_threshold = threshold;
        self
    }

    /// Sets the bootstrap retry backoff bounds.
    #[must_use]
    pub fn with_bootstrap_backoff_ms(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.bootstrap_backoff_base_ms = base_ms;
        self.bootstrap_backoff_max_ms = max_ms;
        self
    }

    pub(crate) fn bootstrap_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.bootstrap_backoff_base_ms),
            Duration::from_millis(self.bootstrap_backoff_max_ms),
            0.1,
        )
    }
}
