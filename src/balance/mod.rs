//! Balance ledger.
//!
//! [`BalanceLedger`] turns reconciled order records into per-asset balance
//! changes without re-fetching the full balance on every order event. It is
//! idempotent per `(pair, id)` and must be serialized per market account;
//! [`SharedBalanceLedger`] provides that mutex.

mod ledger;
mod types;

pub use ledger::{BalanceLedger, SharedBalanceLedger, split_pair};
pub use types::{
    ApplyMode, BalanceEntry, BalanceSnapshot, LedgerConfig, MarketKind, OrderEvent, RecoveryMode,
};
