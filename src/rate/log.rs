//! Rolling rate log persisted in the shared store.

use serde::{Deserialize, Serialize};

use crate::rate::rule::RateRule;

/// One scored call: `(timestamp_ms, weight, is_order)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEntry(pub u64, pub u32, pub bool);

impl RateEntry {
    /// Call time in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.0
    }

    /// Weight cost.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.1
    }

    /// Whether the call counts against the order budget.
    #[must_use]
    pub fn is_order(&self) -> bool {
        self.2
    }
}

/// Current usage, written alongside the history for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateScore {
    /// Weight used in the current weight window.
    pub weight: u32,
    /// Orders sent in the current order window.
    pub orders: u32,
    /// Sampled count of rejected attempts.
    #[serde(default)]
    pub rejected: u64,
}

/// `{history, rule, score}` document stored under the rate-log key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLog {
    /// Scored calls, oldest first.
    #[serde(default)]
    pub history: Vec<RateEntry>,
    /// Rule the log was last scored against.
    #[serde(default)]
    pub rule: RateRule,
    /// Usage at the last write.
    #[serde(default)]
    pub score: RateScore,
}

impl RateLog {
    /// Creates an empty log for `rule`.
    #[must_use]
    pub fn new(rule: RateRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Drops entries that fell out of every window.
    pub fn trim(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(self.rule.longest_window_ms());
        self.history.retain(|e| e.timestamp() > horizon);
    }

    /// Weight used inside the weight window ending at `now_ms`.
    #[must_use]
    pub fn weight_score(&self, now_ms: u64) -> u32 {
        let horizon = now_ms.saturating_sub(self.rule.weight.window_ms());
        self.history
            .iter()
            .filter(|e| e.timestamp() > horizon)
            .fold(0u32, |acc, e| acc.saturating_add(e.weight()))
    }

    /// Orders sent inside the order window ending at `now_ms`.
    #[must_use]
    pub fn order_score(&self, now_ms: u64) -> u32 {
        let horizon = now_ms.saturating_sub(self.rule.orders.window_ms());
        self.history
            .iter()
            .filter(|e| e.is_order() && e.timestamp() > horizon)
            .count() as u32
    }

    /// Recomputes the stored score.
    pub fn refresh_score(&mut self, now_ms: u64) {
        self.score.weight = self.weight_score(now_ms);
        self.score.orders = self.order_score(now_ms);
    }
}
