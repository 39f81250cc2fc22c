//! Shared "banned until" status of an exchange account.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::store::{SharedStore, StoreKeys};
use crate::types::error::{SyncError, SyncResult};

/// `{time, reason}` document stored under the ban key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanStatus {
    /// Ban expiry in milliseconds since the epoch.
    pub time: u64,
    /// Reason reported by the exchange.
    pub reason: String,
}

impl BanStatus {
    /// Returns true while the ban is in force.
    #[must_use]
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.time > now_ms
    }
}

/// Publishes and reads the ban status of one market account.
///
/// Push delivery is advisory only; [`BanChannel::check`] always polls the
/// store directly.
#[derive(Clone)]
pub struct BanChannel {
    store: Arc<dyn SharedStore>,
    keys: StoreKeys,
}

impl BanChannel {
    /// Creates the channel for a market account.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, market: &str, account: &str) -> Self {
        Self {
            store,
            keys: StoreKeys::new(market, account),
        }
    }

    /// Records a ban after the exchange signalled a hard rejection and
    /// broadcasts it to sibling processes.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn ban(&self, until_ms: u64, reason: impl Into<String>) -> SyncResult<()> {
        let status = BanStatus {
            time: until_ms,
            reason: reason.into(),
        };
        let raw = serde_json::to_string(&status)?;
        self.store.set(&self.keys.ban(), &raw).await?;
        self.store.publish(&self.keys.ban_channel(), &raw).await?;
        warn!(
            market = self.keys.market(),
            account = self.keys.account(),
            until = until_ms,
            reason = %status.reason,
            "account banned"
        );
        Ok(())
    }

    /// Removes the ban.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn lift(&self) -> SyncResult<()> {
        self.store.delete(&self.keys.ban()).await?;
        self.store.publish(&self.keys.ban_channel(), "{}").await?;
        Ok(())
    }

    /// Reads the stored ban status.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the status is malformed.
    pub async fn status(&self) -> SyncResult<Option<BanStatus>> {
        match self.store.get(&self.keys.ban()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fails with `SyncError::Banned` while a ban is in force.
    ///
    /// An unreadable status is logged and treated as "not banned"; the rate
    /// governor denies calls on its own when the store is down.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Banned` during an active ban.
    pub async fn check(&self, now_ms: u64) -> SyncResult<()> {
        match self.status().await {
            Ok(Some(status)) if status.is_active(now_ms) => Err(SyncError::Banned {
                until: status.time,
                reason: status.reason,
            }),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    market = self.keys.market(),
                    error = %e,
                    "ban status unreadable"
                );
                Ok(())
            }
        }
    }

    /// Subscribes to ban change broadcasts.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable.
    pub async fn subscribe(&self) -> SyncResult<broadcast::Receiver<String>> {
        self.store.subscribe(&self.keys.ban_channel()).await
    }
}
