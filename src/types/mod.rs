//! Core types: order records, action kinds and the crate error type.

pub mod error;
mod order;

pub use error::{ErrorClass, RejectionKind, SyncError, SyncResult};
pub use order::{ActionKind, OrderRecord, OrderStatus, Side, id_ordering};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generates a unique client order id of the form `{prefix}_{uuid}`.
#[must_use]
pub fn generate_client_order_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().as_simple())
}
