//! Shared store abstraction.
//!
//! Every process touching one exchange account shares a store holding:
//!
//! - per-pair order hashes fed by an upstream order producer,
//! - the rolling rate log of the account and its lock,
//! - the ban status key,
//! - pub/sub channels for order merges and ban changes.
//!
//! # Example
//!
//! ```rust,ignore
//! use order_reconciler::store::{InMemoryStore, SharedStore, StoreKeys};
//!
//! let store = InMemoryStore::new();
//! let keys = StoreKeys::new("binance", "main");
//!
//! store.hash_set(&keys.order_hash("BTC-USD"), "t", "1700000000000").await?;
//! let orders = store.hash_get_all(&keys.order_hash("BTC-USD")).await?;
//! ```

mod memory;
mod repository;
mod types;

pub use memory::InMemoryStore;
pub use repository::SharedStore;
pub use types::{LIVENESS_FIELD, LockToken, SIGNAL_CLEAR, SIGNAL_ONLINE, StoreKeys};
