//! Idempotent balance ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

use crate::Decimal;
use crate::balance::types::{
    ApplyMode, BalanceEntry, BalanceSnapshot, LedgerConfig, MarketKind, OrderEvent, RecoveryMode,
};
use crate::types::error::{SyncError, SyncResult};
use crate::types::{OrderRecord, OrderStatus, Side};

type OrderKey = (String, String);
type Effect = BTreeMap<String, BalanceEntry>;

/// Splits `BTC-USD`, `BTC/USD` or `BTC_USD` into `(base, quote)`.
///
/// # Errors
///
/// Returns `SyncError::InvalidMarketState` when the pair has no separator.
pub fn split_pair(pair: &str) -> SyncResult<(&str, &str)> {
    let mut parts = pair.split(['-', '/', '_']).filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(base), Some(quote)) => Ok((base, quote)),
        _ => Err(SyncError::InvalidMarketState(format!(
            "cannot split pair {}",
            pair
        ))),
    }
}

/// Locally computed per-asset balances, updated from reconciled order
/// records without re-fetching the full balance.
///
/// Every order is remembered by `(pair, id)` together with the last record
/// applied for it. Applying a record adjusts balances by
/// `f(new) - f(remembered)` (or `f(new) - f(nothing)` for a first-seen
/// order), so replaying the same record is a no-op.
///
/// The ledger never calls back into order placement: refreshing balances
/// before acting is the caller's job. Integrity problems fail loudly.
///
/// # Example
///
/// ```rust
/// use order_reconciler::balance::{BalanceLedger, LedgerConfig, OrderEvent};
/// use order_reconciler::types::{OrderRecord, OrderStatus, Side};
/// use order_reconciler::dec;
///
/// let mut ledger = BalanceLedger::new(LedgerConfig::default(), 0);
/// ledger.set_cash("BTC", dec!(1));
///
/// let mut sell = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Sell, dec!(100), dec!(1), 1);
/// sell.acknowledge("9");
/// ledger.apply(&sell, OrderEvent::JustPlaced).unwrap();
/// assert_eq!(ledger.balance("BTC").reserved, dec!(1));
///
/// let filled = sell.with_executed(dec!(1)).with_maker_size(dec!(1)).with_status(OrderStatus::Filled);
/// ledger.apply(&filled, OrderEvent::Changed).unwrap();
/// ledger.apply(&filled, OrderEvent::Changed).unwrap();
/// assert_eq!(ledger.balance("USD").cash, dec!(100));
/// assert_eq!(ledger.balance("BTC").total(), dec!(0));
/// ```
#[derive(Debug)]
pub struct BalanceLedger {
    config: LedgerConfig,
    initialized_at: u64,
    balances: HashMap<String, BalanceEntry>,
    remembered: HashMap<OrderKey, OrderRecord>,
}

impl BalanceLedger {
    /// Creates a ledger initialized at `initialized_at` (milliseconds).
    ///
    /// Orders placed before that time are treated according to the
    /// configured [`RecoveryMode`].
    #[must_use]
    pub fn new(config: LedgerConfig, initialized_at: u64) -> Self {
        Self {
            config,
            initialized_at,
            balances: HashMap::new(),
            remembered: HashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Initialization time in milliseconds.
    #[must_use]
    pub fn initialized_at(&self) -> u64 {
        self.initialized_at
    }

    /// Sets the free cash of an asset, keeping other fields.
    pub fn set_cash(&mut self, asset: &str, amount: Decimal) {
        self.balances.entry(asset.to_string()).or_default().cash = amount;
    }

    /// Replaces an asset's balance with a freshly fetched one.
    pub fn refresh(&mut self, asset: &str, entry: BalanceEntry) {
        self.balances.insert(asset.to_string(), entry);
    }

    /// Balance of an asset (zero if unknown).
    #[must_use]
    pub fn balance(&self, asset: &str) -> BalanceEntry {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    /// Every balance.
    #[must_use]
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            balances: self.balances.clone(),
        }
    }

    /// Number of remembered orders.
    #[must_use]
    pub fn remembered_count(&self) -> usize {
        self.remembered.len()
    }

    /// Last record applied for an order, by exchange or client id.
    #[must_use]
    pub fn remembered(&self, pair: &str, id: &str) -> Option<&OrderRecord> {
        self.remembered.get(&(pair.to_string(), id.to_string()))
    }

    /// Forgets an order once it no longer matters for bookkeeping.
    pub fn forget(&mut self, pair: &str, id: &str) -> bool {
        self.remembered
            .remove(&(pair.to_string(), id.to_string()))
            .is_some()
    }

    /// Applies a reconciled order record.
    ///
    /// # Errors
    ///
    /// - `SyncError::MissingField` if a non-pending order lacks its maker size
    /// - `SyncError::DataIntegrityViolation` if the maker/taker split shrinks
    /// - `SyncError::InvalidMarketState` for unparseable pairs
    pub fn apply(&mut self, order: &OrderRecord, event: OrderEvent) -> SyncResult<BalanceSnapshot> {
        self.apply_with_mode(order, event, ApplyMode::Normal)
    }

    /// Applies a record with an explicit [`ApplyMode`].
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::apply`].
    pub fn apply_with_mode(
        &mut self,
        order: &OrderRecord,
        event: OrderEvent,
        mode: ApplyMode,
    ) -> SyncResult<BalanceSnapshot> {
        let mut order = order.clone();
        order.data.clear();
        if event == OrderEvent::Canceled && !order.is_terminal() {
            if order.status == OrderStatus::Pending && order.maker_size.is_none() {
                order.maker_size = Some(Decimal::ZERO);
            }
            order.status = OrderStatus::Canceled;
        }
        order.normalize();

        let new_effect = self.effect(&order)?;
        let key = (order.pair.clone(), order.key().to_string());

        let previous = self.take_remembered(&order);
        let delta = match previous {
            Some(old) => {
                if let Some(reason) = stale_reason(&old, &order, mode) {
                    warn!(pair = %order.pair, id = order.key(), reason, "ignoring stale order update");
                    self.remembered.insert(key, old);
                    return Ok(self.snapshot());
                }
                if mode == ApplyMode::Normal {
                    if let Err(e) = check_split(&old, &order) {
                        self.remembered.insert(key, old);
                        return Err(e);
                    }
                }
                diff(&new_effect, &self.effect(&old)?)
            }
            None => self.first_seen_delta(&order, event, new_effect),
        };

        self.remembered.insert(key, order);
        for (asset, change) in delta {
            *self.balances.entry(asset).or_default() += change;
        }
        Ok(self.snapshot())
    }

    /// Removes the remembered record of `order`, also under its client id so
    /// an order first seen while pending keeps a single identity.
    fn take_remembered(&mut self, order: &OrderRecord) -> Option<OrderRecord> {
        let by_key = (order.pair.clone(), order.key().to_string());
        if let Some(old) = self.remembered.remove(&by_key) {
            return Some(old);
        }
        let by_client = (order.pair.clone(), order.client_id.clone());
        self.remembered.remove(&by_client)
    }

    fn first_seen_delta(&self, order: &OrderRecord, event: OrderEvent, effect: Effect) -> Effect {
        let pre_existing = event != OrderEvent::JustPlaced && order.placed_at < self.initialized_at;
        if !pre_existing {
            return effect;
        }
        match self.config.recovery_mode {
            RecoveryMode::RememberOnly => Effect::new(),
            RecoveryMode::RecoverReserved => {
                let quote = split_pair(&order.pair).map(|(_, q)| q.to_string()).unwrap_or_default();
                effect
                    .into_iter()
                    .filter(|(asset, _)| *asset != quote)
                    .map(|(asset, e)| (asset, e.reserved_only()))
                    .collect()
            }
            RecoveryMode::RecoverReservedAndCash => effect,
        }
    }

    /// Balance effect of an order relative to it never having existed.
    fn effect(&self, order: &OrderRecord) -> SyncResult<Effect> {
        let (base, quote) = split_pair(&order.pair)?;
        let maker = match (order.maker_size, order.status) {
            (Some(maker), _) => maker,
            (None, OrderStatus::Pending) => Decimal::ZERO,
            (None, _) => {
                error!(pair = %order.pair, id = order.key(), "order without maker size");
                return Err(SyncError::MissingField(format!(
                    "maker_size of order {} on {}",
                    order.key(),
                    order.pair
                )));
            }
        };
        let taker = order.executed - maker;
        let fee = order.price
            * (maker * self.config.maker_fee_rate + taker * self.config.taker_fee_rate);

        let open = if order.is_open() {
            order.remaining
        } else {
            Decimal::ZERO
        };
        let executed = order.executed;
        let price = order.price;

        let mut b = BalanceEntry::default();
        let mut q = BalanceEntry::default();
        match (self.config.market_kind, order.side) {
            (MarketKind::Spot, Side::Buy) => {
                q.reserved = price * open;
                q.cash = -(price * open) - price * executed - fee;
                b.cash = executed;
            }
            (MarketKind::Spot, Side::Sell) => {
                b.reserved = open;
                b.cash = -open - executed;
                q.cash = price * executed - fee;
            }
            (MarketKind::Futures, side) => {
                b.pending = side.sign() * executed;
                q.cash = -fee;
            }
            (MarketKind::VolumeFutures, side) => {
                q.reserved_v = price * open;
                q.cash_v = -(price * open);
                b.pending = side.sign() * executed;
                q.cash = -fee;
            }
        }

        let mut effect = Effect::new();
        effect.insert(base.to_string(), b);
        *effect.entry(quote.to_string()).or_default() += q;
        Ok(effect)
    }
}

/// Why `new` must not replace `old`, if it must not.
fn stale_reason(old: &OrderRecord, new: &OrderRecord, mode: ApplyMode) -> Option<&'static str> {
    if mode == ApplyMode::Replace {
        return None;
    }
    if new.executed < old.executed {
        return Some("executed regressed");
    }
    if old.is_terminal() && !new.is_terminal() {
        return Some("terminal order reopened");
    }
    None
}

fn check_split(old: &OrderRecord, new: &OrderRecord) -> SyncResult<()> {
    let (Some(old_maker), Some(new_maker)) = (old.maker_size, new.maker_size) else {
        return Ok(());
    };
    let old_taker = old.executed - old_maker;
    let new_taker = new.executed - new_maker;
    if new_maker < old_maker || new_taker < old_taker {
        error!(
            pair = %new.pair,
            id = new.key(),
            %old_maker,
            %new_maker,
            %old_taker,
            %new_taker,
            "maker/taker split shrank"
        );
        return Err(SyncError::DataIntegrityViolation(format!(
            "maker/taker split of order {} on {} shrank: maker {} -> {}, taker {} -> {}",
            new.key(),
            new.pair,
            old_maker,
            new_maker,
            old_taker,
            new_taker
        )));
    }
    Ok(())
}

fn diff(new: &Effect, old: &Effect) -> Effect {
    let mut delta = new.clone();
    for (asset, entry) in old {
        *delta.entry(asset.clone()).or_default() += -*entry;
    }
    delta.retain(|_, e| !e.is_zero());
    delta
}

/// Ledger guarded by one mutex per market account.
///
/// `apply` must be serialized per account to keep it idempotent; this
/// wrapper does that for concurrent order-update callbacks.
#[derive(Debug, Clone)]
pub struct SharedBalanceLedger {
    inner: Arc<Mutex<BalanceLedger>>,
}

impl SharedBalanceLedger {
    /// Wraps a ledger.
    #[must_use]
    pub fn new(ledger: BalanceLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Runs `f` with exclusive access to the ledger.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BalanceLedger) -> R,
    {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Applies a reconciled order record.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::apply`].
    pub fn apply(&self, order: &OrderRecord, event: OrderEvent) -> SyncResult<BalanceSnapshot> {
        self.with(|ledger| ledger.apply(order, event))
    }

    /// Balance of an asset.
    #[must_use]
    pub fn balance(&self, asset: &str) -> BalanceEntry {
        self.with(|ledger| ledger.balance(asset))
    }

    /// Every balance.
    #[must_use]
    pub fn snapshot(&self) -> BalanceSnapshot {
        self.with(|ledger| ledger.snapshot())
    }
}

impl From<BalanceLedger> for SharedBalanceLedger {
    fn from(ledger: BalanceLedger) -> Self {
        Self::new(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;

    fn buy(size: Decimal) -> OrderRecord {
        let mut o = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Buy, dec!(100), size, 10);
        o.acknowledge("1");
        o
    }

    fn ledger() -> BalanceLedger {
        let mut l = BalanceLedger::new(LedgerConfig::default(), 5);
        l.set_cash("USD", dec!(300));
        l
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("BTC-USD").unwrap(), ("BTC", "USD"));
        assert_eq!(split_pair("ETH/USDT").unwrap(), ("ETH", "USDT"));
        assert_eq!(split_pair("SOL_USDC").unwrap(), ("SOL", "USDC"));
        assert!(split_pair("BTCUSD").is_err());
    }

    #[test]
    fn test_buy_lifecycle() {
        let mut l = ledger();
        let order = buy(dec!(2));

        l.apply(&order, OrderEvent::JustPlaced).unwrap();
        assert_eq!(l.balance("USD").reserved, dec!(200));
        assert_eq!(l.balance("USD").cash, dec!(100));

        let partial = order.clone().with_executed(dec!(1)).with_maker_size(dec!(1));
        l.apply(&partial, OrderEvent::Changed).unwrap();
        assert_eq!(l.balance("USD").reserved, dec!(100));
        assert_eq!(l.balance("USD").cash, dec!(100));
        assert_eq!(l.balance("BTC").cash, dec!(1));

        l.apply(&partial, OrderEvent::Canceled).unwrap();
        assert_eq!(l.balance("USD").reserved, dec!(0));
        assert_eq!(l.balance("USD").cash, dec!(200));
        assert_eq!(l.balance("BTC").cash, dec!(1));
    }

    #[test]
    fn test_duplicate_apply_is_noop() {
        let mut l = ledger();
        let order = buy(dec!(2));
        l.apply(&order, OrderEvent::JustPlaced).unwrap();
        let once = l.apply(&order, OrderEvent::JustPlaced).unwrap();
        let twice = l.apply(&order, OrderEvent::Changed).unwrap();
        assert_eq!(once, twice);
        assert_eq!(l.balance("USD").reserved, dec!(200));
    }

    #[test]
    fn test_pending_then_acknowledged_keeps_identity() {
        let mut l = ledger();
        let pending = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Buy, dec!(100), dec!(2), 10);
        l.apply(&pending, OrderEvent::JustPlaced).unwrap();

        let mut acked = pending.clone();
        acked.acknowledge("77");
        l.apply(&acked, OrderEvent::Changed).unwrap();

        assert_eq!(l.balance("USD").reserved, dec!(200));
        assert_eq!(l.remembered_count(), 1);
        assert!(l.remembered("BTC-USD", "77").is_some());
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut l = ledger();
        let order = buy(dec!(2));
        l.apply(&order, OrderEvent::JustPlaced).unwrap();
        let later = order.clone().with_executed(dec!(1.5)).with_maker_size(dec!(1.5));
        l.apply(&later, OrderEvent::Changed).unwrap();
        let snapshot = l.snapshot();

        let earlier = order.clone().with_executed(dec!(0.5)).with_maker_size(dec!(0.5));
        assert_eq!(l.apply(&earlier, OrderEvent::Changed).unwrap(), snapshot);
    }

    #[test]
    fn test_sell_fill_with_fees() {
        let mut l = BalanceLedger::new(
            LedgerConfig::default().with_fee_rates(dec!(0.001), dec!(0.002)),
            0,
        );
        l.set_cash("BTC", dec!(2));
        let mut sell = OrderRecord::new("demo", "BTC-USD", "s", Side::Sell, dec!(1000), dec!(2), 1);
        sell.acknowledge("5");
        l.apply(&sell, OrderEvent::JustPlaced).unwrap();
        assert_eq!(l.balance("BTC").reserved, dec!(2));
        assert_eq!(l.balance("BTC").cash, dec!(0));

        let filled = sell
            .with_executed(dec!(2))
            .with_maker_size(dec!(1))
            .with_status(OrderStatus::Filled);
        l.apply(&filled, OrderEvent::Changed).unwrap();
        // 2000 proceeds - (1 * 1000 * 0.001 + 1 * 1000 * 0.002)
        assert_eq!(l.balance("USD").cash, dec!(1997));
        assert_eq!(l.balance("BTC").total(), dec!(0));
    }

    #[test]
    fn test_missing_maker_size_fails_closed() {
        let mut l = ledger();
        let mut order = buy(dec!(2));
        order.maker_size = None;
        let err = l.apply(&order, OrderEvent::Changed).unwrap_err();
        assert!(matches!(err, SyncError::MissingField(_)));
        assert_eq!(l.balance("USD").cash, dec!(300));
    }

    #[test]
    fn test_split_shrink_is_integrity_violation() {
        let mut l = ledger();
        let order = buy(dec!(2));
        l.apply(&order, OrderEvent::JustPlaced).unwrap();
        let a = order.clone().with_executed(dec!(1)).with_maker_size(dec!(1));
        l.apply(&a, OrderEvent::Changed).unwrap();

        // same executed, maker moved to taker
        let b = order.clone().with_executed(dec!(1.5)).with_maker_size(dec!(0.5));
        let err = l.apply(&b, OrderEvent::Changed).unwrap_err();
        assert!(matches!(err, SyncError::DataIntegrityViolation(_)));
        // remembered state untouched
        assert_eq!(l.remembered("BTC-USD", "1").unwrap().executed, dec!(1));

        // the explicit replace path accepts it
        l.apply_with_mode(&b, OrderEvent::Changed, ApplyMode::Replace)
            .unwrap();
        assert_eq!(l.balance("BTC").cash, dec!(1.5));
    }

    #[test]
    fn test_recovery_modes() {
        // sell placed at t=1, ledger initialized at t=5
        let mut sell = OrderRecord::new("demo", "BTC-USD", "s", Side::Sell, dec!(100), dec!(2), 1);
        sell.acknowledge("3");
        let buy_order = {
            let mut b = OrderRecord::new("demo", "BTC-USD", "b", Side::Buy, dec!(100), dec!(1), 1);
            b.acknowledge("4");
            b
        };

        let mut only = BalanceLedger::new(LedgerConfig::default(), 5);
        only.apply(&sell, OrderEvent::Changed).unwrap();
        only.apply(&buy_order, OrderEvent::Changed).unwrap();
        assert!(only.snapshot().balances.values().all(BalanceEntry::is_zero));
        assert_eq!(only.remembered_count(), 2);

        let mut reserved = BalanceLedger::new(
            LedgerConfig::default().with_recovery_mode(RecoveryMode::RecoverReserved),
            5,
        );
        reserved.apply(&sell, OrderEvent::Changed).unwrap();
        reserved.apply(&buy_order, OrderEvent::Changed).unwrap();
        assert_eq!(reserved.balance("BTC").reserved, dec!(2));
        assert_eq!(reserved.balance("BTC").cash, dec!(0));
        assert_eq!(reserved.balance("USD"), BalanceEntry::default());

        let mut full = BalanceLedger::new(
            LedgerConfig::default().with_recovery_mode(RecoveryMode::RecoverReservedAndCash),
            5,
        );
        full.set_cash("USD", dec!(500));
        full.apply(&buy_order, OrderEvent::Changed).unwrap();
        assert_eq!(full.balance("USD").reserved, dec!(100));
        assert_eq!(full.balance("USD").cash, dec!(400));
    }

    #[test]
    fn test_recovered_order_later_fill_is_incremental() {
        let mut l = BalanceLedger::new(LedgerConfig::default(), 5);
        l.refresh(
            "USD",
            BalanceEntry {
                cash: dec!(100),
                reserved: dec!(200),
                ..BalanceEntry::default()
            },
        );
        let mut order = OrderRecord::new("demo", "BTC-USD", "c", Side::Buy, dec!(100), dec!(2), 1);
        order.acknowledge("8");
        l.apply(&order, OrderEvent::Changed).unwrap();

        let filled = order
            .with_executed(dec!(2))
            .with_maker_size(dec!(2))
            .with_status(OrderStatus::Filled);
        l.apply(&filled, OrderEvent::Changed).unwrap();
        assert_eq!(l.balance("USD").reserved, dec!(0));
        assert_eq!(l.balance("USD").cash, dec!(100));
        assert_eq!(l.balance("BTC").cash, dec!(2));
    }

    #[test]
    fn test_futures_reserve_no_cash() {
        let mut l = BalanceLedger::new(
            LedgerConfig::default().with_market_kind(MarketKind::Futures),
            0,
        );
        l.set_cash("USD", dec!(1000));
        let mut short = OrderRecord::new("f", "BTC-USD", "c", Side::Sell, dec!(100), dec!(3), 1);
        short.acknowledge("1");
        l.apply(&short, OrderEvent::JustPlaced).unwrap();
        assert_eq!(l.balance("USD").reserved, dec!(0));

        let partial = short.with_executed(dec!(2)).with_maker_size(dec!(2));
        l.apply(&partial, OrderEvent::Changed).unwrap();
        assert_eq!(l.balance("BTC").pending, dec!(-2));
        assert_eq!(l.balance("USD").cash, dec!(1000));
    }

    #[test]
    fn test_volume_futures_use_volume_fields() {
        let mut l = BalanceLedger::new(
            LedgerConfig::default().with_market_kind(MarketKind::VolumeFutures),
            0,
        );
        let mut long = OrderRecord::new("f", "BTC-USD", "c", Side::Buy, dec!(10), dec!(3), 1);
        long.acknowledge("1");
        l.apply(&long, OrderEvent::JustPlaced).unwrap();
        assert_eq!(l.balance("USD").reserved_v, dec!(30));
        assert_eq!(l.balance("USD").cash_v, dec!(-30));
        assert_eq!(l.balance("USD").reserved, dec!(0));

        l.apply(&long, OrderEvent::Canceled).unwrap();
        assert_eq!(l.balance("USD").reserved_v, dec!(0));
        assert_eq!(l.balance("USD").cash_v, dec!(0));
    }

    #[test]
    fn test_shared_ledger() {
        let shared = SharedBalanceLedger::from(ledger());
        let other = shared.clone();
        shared.apply(&buy(dec!(1)), OrderEvent::JustPlaced).unwrap();
        assert_eq!(other.balance("USD").reserved, dec!(100));
        assert_eq!(other.with(|l| l.remembered_count()), 1);
    }

    #[test]
    fn test_forget() {
        let mut l = ledger();
        l.apply(&buy(dec!(1)), OrderEvent::JustPlaced).unwrap();
        assert!(l.forget("BTC-USD", "1"));
        assert!(!l.forget("BTC-USD", "1"));
    }
}
