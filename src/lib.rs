//! # order-reconciler
//!
//! Order-action plumbing for trading logic that talks to external exchanges
//! under three constraints:
//!
//! - a shared, externally enforced API rate budget must never be exceeded,
//! - balance effects must never be double counted despite retries and
//!   out-of-order notifications,
//! - ambiguous network outcomes ("did my cancel actually happen?") must be
//!   resolved into one authoritative answer.
//!
//! # Components
//!
//! - [`rate::RateGovernor`]: multi-process sliding-window budget backed by a
//!   shared store, gating every outbound call.
//! - [`mirror::OrderMirror`]: broadcast-fed read replica of remote order state
//!   per market, owned by a per-process [`mirror::MirrorRegistry`].
//! - [`execution::OrderCoordinator`]: turns one logical order action into
//!   exactly one authoritative [`types::OrderRecord`].
//! - [`balance::BalanceLedger`]: applies reconciled order records to an
//!   in-memory balance view idempotently.
//!
//! # Example
//!
//! ```rust
//! use order_reconciler::balance::{BalanceLedger, LedgerConfig, OrderEvent};
//! use order_reconciler::types::{OrderRecord, Side};
//! use order_reconciler::dec;
//!
//! let mut ledger = BalanceLedger::new(LedgerConfig::default(), 0);
//! ledger.set_cash("USD", dec!(300));
//!
//! let mut order = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Buy, dec!(100), dec!(2), 1);
//! order.acknowledge("1001");
//!
//! let snapshot = ledger.apply(&order, OrderEvent::JustPlaced).unwrap();
//! assert_eq!(snapshot.get("USD").unwrap().reserved, dec!(200));
//! assert_eq!(snapshot.get("USD").unwrap().cash, dec!(100));
//! ```

pub mod balance;
pub mod common;
pub mod config;
pub mod execution;
pub mod mirror;
pub mod rate;
pub mod store;
pub mod types;

pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;

/// Commonly used items.
pub mod prelude {
    pub use crate::balance::{
        ApplyMode, BalanceEntry, BalanceLedger, BalanceSnapshot, LedgerConfig, MarketKind,
        OrderEvent, RecoveryMode, SharedBalanceLedger,
    };
    pub use crate::config::ReconcilerConfig;
    pub use crate::execution::{
        CancelOptions, ExchangeAdapter, OrderCoordinator, PlaceOptions, PlaceRequest,
        QueryOptions, Resolved, ResolvedBy,
    };
    pub use crate::mirror::{MirrorConfig, MirrorRegistry, OrderMirror};
    pub use crate::rate::{AcquireOptions, BanChannel, RateCategory, RateGovernor, RateRule};
    pub use crate::store::{InMemoryStore, SharedStore};
    pub use crate::types::error::{SyncError, SyncResult};
    pub use crate::types::{ActionKind, OrderRecord, OrderStatus, Side};
    pub use crate::{Decimal, dec};
}
