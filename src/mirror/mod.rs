//! Broadcast-fed order mirrors.
//!
//! An [`OrderMirror`] keeps an eventually consistent replica of one market
//! account's remote orders:
//!
//! - **Bootstrap**: full resync from the per-pair order hashes in the shared
//!   store, replacing the in-memory map atomically.
//! - **Merge**: incremental `{id: order}` broadcasts applied field by field,
//!   last message wins per id.
//! - **Signals**: `SIGNAL/CLEAR` drops the map, `SIGNAL/ONLINE` bootstraps.
//! - **Eviction**: past `max(2048, 2 × size at last bootstrap)` entries the
//!   mirror drops everything and bootstraps again.
//!
//! The mirror is never authoritative: a missing entry is not proof that an
//! order does not exist.

mod config;
mod message;
mod order_mirror;
mod registry;

pub use config::MirrorConfig;
pub use message::{MirrorMessage, OrderPatch};
pub use order_mirror::OrderMirror;
pub use registry::MirrorRegistry;
