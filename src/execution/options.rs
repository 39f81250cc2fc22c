//! Per-operation options of the coordinator.

use std::time::Duration;

use crate::rate::RateCategory;

/// How long [`crate::execution::OrderCoordinator::execute`] may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Keep polling until the action resolves or fails definitively.
    UntilResolved,
    /// Give up after `timeout`, returning the best-known record unless
    /// `fail_if_unresolved` is set.
    Bounded {
        /// Longest wait.
        timeout: Duration,
        /// Fail with `QueryUnresolved` instead of returning a stale record.
        fail_if_unresolved: bool,
    },
}

/// Options of [`crate::execution::OrderCoordinator::place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceOptions {
    /// Return `Ok(None)` instead of non-fatal errors.
    pub allow_fail: bool,
    /// Rate category of the request.
    pub priority: RateCategory,
}

impl Default for PlaceOptions {
    fn default() -> Self {
        Self {
            allow_fail: false,
            priority: RateCategory::Normal,
        }
    }
}

impl PlaceOptions {
    /// Best-effort placement.
    #[must_use]
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Sets the rate category.
    #[must_use]
    pub fn with_priority(mut self, priority: RateCategory) -> Self {
        self.priority = priority;
        self
    }
}

/// Options of [`crate::execution::OrderCoordinator::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOptions {
    /// Return `Ok(None)` instead of non-fatal errors.
    pub allow_fail: bool,
    /// Rate category of the request.
    pub priority: RateCategory,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            allow_fail: false,
            priority: RateCategory::Cancel,
        }
    }
}

impl CancelOptions {
    /// Best-effort cancel.
    #[must_use]
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Sets the rate category.
    #[must_use]
    pub fn with_priority(mut self, priority: RateCategory) -> Self {
        self.priority = priority;
        self
    }
}

/// Options of [`crate::execution::OrderCoordinator::query`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use order_reconciler::execution::QueryOptions;
///
/// let opts = QueryOptions::default()
///     .with_timeout(Duration::from_millis(500))
///     .fail_if_unresolved()
///     .allow_fail();
/// assert!(opts.allow_fail && opts.fail_if_unresolved);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Return `Ok(None)` instead of non-fatal errors.
    pub allow_fail: bool,
    /// Rate category of the request.
    pub priority: RateCategory,
    /// Longest wait for an answer.
    pub timeout: Duration,
    /// Fail instead of returning a stale record on timeout.
    pub fail_if_unresolved: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            allow_fail: false,
            priority: RateCategory::Normal,
            timeout: Duration::from_secs(5),
            fail_if_unresolved: false,
        }
    }
}

impl QueryOptions {
    /// Best-effort query.
    #[must_use]
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Sets the rate category.
    #[must_use]
    pub fn with_priority(mut self, priority: RateCategory) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the longest wait.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fails with `QueryUnresolved` on timeout.
    #[must_use]
    pub fn fail_if_unresolved(mut self) -> Self {
        self.fail_if_unresolved = true;
        self
    }

    pub(crate) fn wait(&self) -> Wait {
        Wait::Bounded {
            timeout: self.timeout,
            fail_if_unresolved: self.fail_if_unresolved,
        }
    }
}
