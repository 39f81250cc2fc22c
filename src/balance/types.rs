//! Balance ledger types and configuration.

use std::collections::HashMap;
use std::ops::{AddAssign, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::Decimal;
use crate::types::error::{SyncError, SyncResult};

/// Per-asset balance.
///
/// `cash` is free balance, `reserved` is locked by open orders. The `_v`
/// fields are volume-denominated and only used by volume-quoted futures
/// markets; `pending` carries derived futures exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    /// Free balance.
    pub cash: Decimal,
    /// Balance locked by open orders.
    pub reserved: Decimal,
    /// Derived position exposure (futures).
    pub pending: Decimal,
    /// Free volume (volume-quoted futures).
    pub cash_v: Decimal,
    /// Locked volume (volume-quoted futures).
    pub reserved_v: Decimal,
}

impl BalanceEntry {
    /// Entry holding only free cash.
    #[must_use]
    pub fn cash(amount: Decimal) -> Self {
        Self {
            cash: amount,
            ..Self::default()
        }
    }

    /// Free plus reserved balance.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.cash + self.reserved
    }

    /// Returns true if every field is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Copy holding only the `reserved` field.
    #[must_use]
    pub fn reserved_only(&self) -> Self {
        Self {
            reserved: self.reserved,
            ..Self::default()
        }
    }
}

impl AddAssign for BalanceEntry {
    fn add_assign(&mut self, rhs: Self) {
        self.cash += rhs.cash;
        self.reserved += rhs.reserved;
        self.pending += rhs.pending;
        self.cash_v += rhs.cash_v;
        self.reserved_v += rhs.reserved_v;
    }
}

impl Sub for BalanceEntry {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            cash: self.cash - rhs.cash,
            reserved: self.reserved - rhs.reserved,
            pending: self.pending - rhs.pending,
            cash_v: self.cash_v - rhs.cash_v,
            reserved_v: self.reserved_v - rhs.reserved_v,
        }
    }
}

impl Neg for BalanceEntry {
    type Output = Self;

    fn neg(self) -> Self {
        Self::default() - self
    }
}

/// Balances after an `apply`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Asset → balance.
    pub balances: HashMap<String, BalanceEntry>,
}

impl BalanceSnapshot {
    /// Balance of one asset.
    #[must_use]
    pub fn get(&self, asset: &str) -> Option<&BalanceEntry> {
        self.balances.get(asset)
    }
}

/// How orders affect balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    /// Spot: orders reserve and move cash.
    #[default]
    Spot,
    /// Margin futures: no spot cash is reserved.
    Futures,
    /// Volume-quoted futures: reservations tracked in the `_v` fields.
    VolumeFutures,
}

/// Treatment of orders placed before the ledger was initialized.
///
/// Set explicitly per exchange; never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Remember only; the fresh balance fetch already reflects the order.
    #[default]
    RememberOnly,
    /// Restore the missing reservation of non-quote assets only.
    RecoverReserved,
    /// Restore reservations and deduct quote cash as if just placed.
    RecoverReservedAndCash,
}

/// Order event fed to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    /// The order was just placed by this process.
    JustPlaced,
    /// Fill or status change.
    Changed,
    /// The order was canceled.
    Canceled,
}

/// Whether an apply may rewrite history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Regular update: fills only grow.
    #[default]
    Normal,
    /// The order was amended; the new record replaces the remembered one
    /// even if sizes shrink.
    Replace,
}

/// Balance ledger configuration.
///
/// # Example
///
/// ```rust
/// use order_reconciler::balance::{LedgerConfig, MarketKind, RecoveryMode};
/// use order_reconciler::dec;
///
/// let config = LedgerConfig::default()
///     .with_market_kind(MarketKind::Spot)
///     .with_recovery_mode(RecoveryMode::RecoverReserved)
///     .with_fee_rates(dec!(0.0002), dec!(0.0005));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Market kind.
    pub market_kind: MarketKind,
    /// Treatment of pre-existing orders.
    pub recovery_mode: RecoveryMode,
    /// Fee rate on maker fills, charged in the quote asset.
    pub maker_fee_rate: Decimal,
    /// Fee rate on taker fills, charged in the quote asset.
    pub taker_fee_rate: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            market_kind: MarketKind::Spot,
            recovery_mode: RecoveryMode::RememberOnly,
            maker_fee_rate: Decimal::ZERO,
            taker_fee_rate: Decimal::ZERO,
        }
    }
}

impl LedgerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the market kind.
    #[must_use]
    pub fn with_market_kind(mut self, kind: MarketKind) -> Self {
        self.market_kind = kind;
        self
    }

    /// Sets the recovery mode.
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Sets maker and taker fee rates.
    #[must_use]
    pub fn with_fee_rates(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.maker_fee_rate = maker;
        self.taker_fee_rate = taker;
        self
    }

    /// Validates fee rates.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfiguration` for rates outside [-1, 1].
    pub fn validate(&self) -> SyncResult<()> {
        for rate in [self.maker_fee_rate, self.taker_fee_rate] {
            if rate.abs() > Decimal::ONE {
                return Err(SyncError::InvalidConfiguration(
                    "fee rates must be within [-1, 1]".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;

    #[test]
    fn test_entry_arithmetic() {
        let mut a = BalanceEntry::cash(dec!(10));
        a.reserved = dec!(5);
        let b = BalanceEntry::cash(dec!(3));

        let d = a - b;
        assert_eq!(d.cash, dec!(7));
        assert_eq!(d.reserved, dec!(5));
        assert_eq!((-d).cash, dec!(-7));

        a += b;
        assert_eq!(a.total(), dec!(18));
        assert_eq!(a.reserved_only().cash, Decimal::ZERO);
        assert!(BalanceEntry::default().is_zero());
    }

    #[test]
    fn test_config_validation() {
        assert!(LedgerConfig::default().validate().is_ok());
        let bad = LedgerConfig::default().with_fee_rates(dec!(2), dec!(0));
        assert!(bad.validate().is_err());
    }
}
