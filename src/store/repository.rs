//! Shared store trait used by the mirror, the rate governor and the ban
//! channel.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::store::types::LockToken;
use crate::types::error::SyncResult;

/// Abstract multi-writer store shared across processes.
///
/// The shape follows a Redis-like key/value store: plain string keys,
/// hashes, TTL locks and pub/sub channels. Every method may fail with
/// [`crate::types::SyncError::StoreUnavailable`]; callers degrade instead of
/// crashing.
#[async_trait]
pub trait SharedStore: Send + Sync {
    // Plain keys

    /// Gets a string value.
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Sets a string value.
    async fn set(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Deletes a key of any kind. Returns true if something was removed.
    async fn delete(&self, key: &str) -> SyncResult<bool>;

    /// Lists every key (plain or hash) starting with `prefix`.
    async fn keys(&self, prefix: &str) -> SyncResult<Vec<String>>;

    // Hash operations

    /// Gets all fields of a hash. Missing hashes are empty.
    async fn hash_get_all(&self, key: &str) -> SyncResult<HashMap<String, String>>;

    /// Sets one field of a hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> SyncResult<()>;

    /// Deletes one field of a hash.
    async fn hash_delete(&self, key: &str, field: &str) -> SyncResult<bool>;

    // Locks

    /// Tries to take a mutual-exclusion lock that expires after `ttl`.
    ///
    /// Returns `None` while someone else holds an unexpired lock.
    async fn try_lock(&self, key: &str, ttl: Duration) -> SyncResult<Option<LockToken>>;

    /// Releases a lock if `token` still owns it.
    async fn unlock(&self, key: &str, token: &LockToken) -> SyncResult<bool>;

    // Pub/sub

    /// Publishes a message. Returns the number of live subscribers.
    async fn publish(&self, channel: &str, message: &str) -> SyncResult<usize>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> SyncResult<broadcast::Receiver<String>>;
}
