//! In-memory shared store implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};

use crate::store::repository::SharedStore;
use crate::store::types::LockToken;
use crate::types::error::{SyncError, SyncResult};

// Type aliases for cleaner code
type ValueMap = HashMap<String, String>;
type HashMapMap = HashMap<String, HashMap<String, String>>;
type LockMap = HashMap<String, (LockToken, Instant)>;
type ChannelMap = HashMap<String, broadcast::Sender<String>>;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-memory store shared by every clone within one process.
///
/// Stands in for the cross-process store in tests and single-process
/// deployments. Availability can be toggled to simulate an unreachable
/// store.
#[derive(Clone)]
pub struct InMemoryStore {
    values: Arc<RwLock<ValueMap>>,
    hashes: Arc<RwLock<HashMapMap>>,
    locks: Arc<RwLock<LockMap>>,
    channels: Arc<RwLock<ChannelMap>>,
    available: Arc<AtomicBool>,
    next_token: Arc<AtomicU64>,
    channel_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty store whose channels buffer `capacity` messages per
    /// subscriber.
    #[must_use]
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            values: Arc::new(RwLock::new(HashMap::new())),
            hashes: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            next_token: Arc::new(AtomicU64::new(1)),
            channel_capacity: capacity.max(1),
        }
    }

    /// Makes every subsequent call succeed (`true`) or fail with
    /// `StoreUnavailable` (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> SyncResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::StoreUnavailable(
                "in-memory store switched off".to_string(),
            ))
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels: tokio::sync::RwLockWriteGuard<'_, ChannelMap> =
            self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        self.ensure_available()?;
        let values: tokio::sync::RwLockReadGuard<'_, ValueMap> = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.ensure_available()?;
        let mut values: tokio::sync::RwLockWriteGuard<'_, ValueMap> = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<bool> {
        self.ensure_available()?;
        let removed_value = {
            let mut values: tokio::sync::RwLockWriteGuard<'_, ValueMap> =
                self.values.write().await;
            values.remove(key).is_some()
        };
        let removed_hash = {
            let mut hashes: tokio::sync::RwLockWriteGuard<'_, HashMapMap> =
                self.hashes.write().await;
            hashes.remove(key).is_some()
        };
        Ok(removed_value || removed_hash)
    }

    async fn keys(&self, prefix: &str) -> SyncResult<Vec<String>> {
        self.ensure_available()?;
        let mut result: Vec<String> = {
            let values: tokio::sync::RwLockReadGuard<'_, ValueMap> = self.values.read().await;
            values
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        };
        {
            let hashes: tokio::sync::RwLockReadGuard<'_, HashMapMap> = self.hashes.read().await;
            result.extend(hashes.keys().filter(|k| k.starts_with(prefix)).cloned());
        }
        result.sort();
        result.dedup();
        Ok(result)
    }

    async fn hash_get_all(&self, key: &str) -> SyncResult<HashMap<String, String>> {
        self.ensure_available()?;
        let hashes: tokio::sync::RwLockReadGuard<'_, HashMapMap> = self.hashes.read().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> SyncResult<()> {
        self.ensure_available()?;
        let mut hashes: tokio::sync::RwLockWriteGuard<'_, HashMapMap> = self.hashes.write().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> SyncResult<bool> {
        self.ensure_available()?;
        let mut hashes: tokio::sync::RwLockWriteGuard<'_, HashMapMap> = self.hashes.write().await;
        Ok(hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> SyncResult<Option<LockToken>> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut locks: tokio::sync::RwLockWriteGuard<'_, LockMap> = self.locks.write().await;
        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = LockToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        locks.insert(key.to_string(), (token, now + ttl));
        Ok(Some(token))
    }

    async fn unlock(&self, key: &str, token: &LockToken) -> SyncResult<bool> {
        self.ensure_available()?;
        let mut locks: tokio::sync::RwLockWriteGuard<'_, LockMap> = self.locks.write().await;
        match locks.get(key) {
            Some((owner, _)) if owner == token => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> SyncResult<usize> {
        self.ensure_available()?;
        let sender = self.sender(channel).await;
        // No subscribers is not an error for pub/sub.
        Ok(sender.send(message.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> SyncResult<broadcast::Receiver<String>> {
        self.ensure_available()?;
        Ok(self.sender(channel).await.subscribe())
    }
}
