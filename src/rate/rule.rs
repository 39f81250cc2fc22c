use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::error::{SyncError, SyncResult};

/// One sliding-window budget: at most `max` units per `seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRule {
    /// Budget per window.
    pub max: u32,
    /// Window length in seconds.
    pub seconds: f64,
}

impl WindowRule {
    /// Creates a window rule.
    #[must_use]
    pub fn new(max: u32, seconds: f64) -> Self {
        Self { max, seconds }
    }

    /// Window length in milliseconds.
    #[must_use]
    pub fn window_ms(&self) -> u64 {
        (self.seconds * 1000.0).round().max(0.0) as u64
    }
}

/// Weight and order-count budgets of one market account.
///
/// # Example
///
/// ```rust
/// use order_reconciler::rate::{RateRule, WindowRule};
///
/// // 1200 weight per minute, 10 orders per second
/// let rule = RateRule::new(WindowRule::new(1200, 60.0), WindowRule::new(10, 1.0));
/// assert_eq!(rule.longest_window_ms(), 60_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRule {
    /// Weight budget.
    pub weight: WindowRule,
    /// Order-count budget.
    pub orders: WindowRule,
}

impl Default for RateRule {
    fn default() -> Self {
        Self {
            weight: WindowRule::new(1200, 60.0),
            orders: WindowRule::new(50, 10.0),
        }
    }
}

impl RateRule {
    /// Creates a rule from its two windows.
    #[must_use]
    pub fn new(weight: WindowRule, orders: WindowRule) -> Self {
        Self { weight, orders }
    }

    /// Length of the longer window, i.e. how long history must be kept.
    #[must_use]
    pub fn longest_window_ms(&self) -> u64 {
        self.weight.window_ms().max(self.orders.window_ms())
    }

    /// Validates the rule.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfiguration` for empty budgets or
    /// non-positive windows.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, window) in [("weight", &self.weight), ("orders", &self.orders)] {
            if window.max == 0 {
                return Err(SyncError::InvalidConfiguration(format!(
                    "{} budget must be positive",
                    name
                )));
            }
            if window.seconds <= 0.0 || !window.seconds.is_finite() {
                return Err(SyncError::InvalidConfiguration(format!(
                    "{} window must be a positive number of seconds",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Priority class of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    /// Regular traffic; leaves the emergency quota untouched.
    Normal,
    /// Cancels; may dip into the order-budget reservation.
    Cancel,
    /// Critical calls; may use the whole budget.
    Emergency,
    /// Connection handshakes; always allowed and never scored.
    Handshake,
    /// Background traffic; leaves twice the emergency quota untouched.
    LowPriority,
}

impl RateCategory {
    /// Effective `(weight, orders)` ceilings given the rolled reservations.
    #[must_use]
    pub fn ceilings(&self, rule: &RateRule, reserve_weight: u32, reserve_orders: u32) -> (u32, u32) {
        let weight = rule.weight.max;
        let orders = rule.orders.max;
        match self {
            RateCategory::Normal => (
                weight.saturating_sub(reserve_weight),
                orders.saturating_sub(reserve_orders),
            ),
            RateCategory::LowPriority => (
                weight.saturating_sub(reserve_weight.saturating_mul(2)),
                orders.saturating_sub(reserve_orders.saturating_mul(2)),
            ),
            RateCategory::Cancel => (weight.saturating_sub(reserve_weight), orders),
            RateCategory::Emergency | RateCategory::Handshake => (weight, orders),
        }
    }
}

/// Per-call options of [`crate::rate::RateGovernor::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquireOptions {
    /// Whether the call counts against the order budget.
    pub is_order: bool,
    /// Give up after this many failed lock rounds; `None` waits forever.
    pub max_lock_rounds: Option<u32>,
}

impl AcquireOptions {
    /// A call scored against the weight budget only.
    #[must_use]
    pub fn weight_only() -> Self {
        Self::default()
    }

    /// A call scored against both the weight and the order budget.
    #[must_use]
    pub fn order() -> Self {
        Self {
            is_order: true,
            max_lock_rounds: None,
        }
    }

    /// Allows giving up after `rounds` failed lock attempts.
    #[must_use]
    pub fn give_up_after(mut self, rounds: u32) -> Self {
        self.max_lock_rounds = Some(rounds);
        self
    }
}

/// Rate governor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateGovernorConfig {
    /// Rule used for markets without an override.
    pub default_rule: RateRule,
    /// Per-market overrides.
    pub rules: HashMap<String, RateRule>,
    /// Mean share of each budget held back for emergencies.
    pub emergency_fraction: f64,
    /// Share of rejected attempts written back to the log.
    pub rejected_sample_rate: f64,
    /// Lock time-to-live in milliseconds.
    pub lock_ttl_ms: u64,
    /// Sleep between lock rounds in milliseconds.
    pub lock_retry_ms: u64,
}

impl Default for RateGovernorConfig {
    fn default() -> Self {
        Self {
            default_rule: RateRule::default(),
            rules: HashMap::new(),
            emergency_fraction: 0.1,
            rejected_sample_rate: 0.05,
            lock_ttl_ms: 2_000,
            lock_retry_ms: 5,
        }
    }
}

impl RateGovernorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default rule.
    #[must_use]
    pub fn with_default_rule(mut self, rule: RateRule) -> Self {
        self.default_rule = rule;
        self
    }

    /// Overrides the rule of one market.
    #[must_use]
    pub fn with_market_rule(mut self, market: impl Into<String>, rule: RateRule) -> Self {
        self.rules.insert(market.into(), rule);
        self
    }

    /// Sets the emergency fraction.
    #[must_use]
    pub fn with_emergency_fraction(mut self, fraction: f64) -> Self {
        self.emergency_fraction = fraction;
        self
    }

    /// Sets the rejected-attempt sample rate.
    #[must_use]
    pub fn with_rejected_sample_rate(mut self, rate: f64) -> Self {
        self.rejected_sample_rate = rate;
        self
    }

    /// Sets lock TTL and retry sleep.
    #[must_use]
    pub fn with_lock_timing_ms(mut self, ttl_ms: u64, retry_ms: u64) -> Self {
        self.lock_ttl_ms = ttl_ms;
        self.lock_retry_ms = retry_ms;
        self
    }

    /// Rule that applies to `market`.
    #[must_use]
    pub fn rule_for(&self, market: &str) -> &RateRule {
        self.rules.get(market).unwrap_or(&self.default_rule)
    }

    /// Validates every rule and fraction.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfiguration` on the first invalid value.
    pub fn validate(&self) -> SyncResult<()> {
        self.default_rule.validate()?;
        for rule in self.rules.values() {
            rule.validate()?;
        }
        if !(0.0..0.5).contains(&self.emergency_fraction) {
            return Err(SyncError::InvalidConfiguration(
                "emergency_fraction must be in [0, 0.5)".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rejected_sample_rate) {
            return Err(SyncError::InvalidConfiguration(
                "rejected_sample_rate must be in [0, 1]".to_string(),
            ));
        }
        if self.lock_ttl_ms == 0 {
            return Err(SyncError::InvalidConfiguration(
                "lock_ttl_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
