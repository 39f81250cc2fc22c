//! Per-process registry of order mirrors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::task::JoinHandle;

use crate::mirror::config::MirrorConfig;
use crate::mirror::order_mirror::OrderMirror;
use crate::store::{SharedStore, StoreKeys};
use crate::types::OrderRecord;

/// Owns one [`OrderMirror`] per market account and its listener task.
///
/// Construct once per process and pass by reference (or `Arc`) to the
/// coordinators that need it.
pub struct MirrorRegistry {
    store: Arc<dyn SharedStore>,
    config: MirrorConfig,
    mirrors: RwLock<HashMap<StoreKeys, Arc<OrderMirror>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl MirrorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: MirrorConfig) -> Self {
        Self {
            store,
            config,
            mirrors: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Shared store the mirrors read from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    /// Returns the mirror of a market account if one exists.
    #[must_use]
    pub fn get(&self, market: &str, account: &str) -> Option<Arc<OrderMirror>> {
        let mirrors = self.mirrors.read().unwrap_or_else(PoisonError::into_inner);
        mirrors.get(&StoreKeys::new(market, account)).cloned()
    }

    /// Returns the mirror of a market account, creating it (without a
    /// listener) if needed. Bootstrapping is up to the caller.
    pub fn register(&self, market: &str, account: &str) -> Arc<OrderMirror> {
        self.get_or_insert(market, account).0
    }

    /// Returns the mirror of a market account, creating it and spawning its
    /// broadcast listener on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_spawn(&self, market: &str, account: &str) -> Arc<OrderMirror> {
        let (mirror, created) = self.get_or_insert(market, account);
        if created {
            let handle = mirror.spawn_listener();
            self.listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        mirror
    }

    fn get_or_insert(&self, market: &str, account: &str) -> (Arc<OrderMirror>, bool) {
        let keys = StoreKeys::new(market, account);
        let mut mirrors = self.mirrors.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = mirrors.get(&keys) {
            return (Arc::clone(existing), false);
        }
        let mirror = Arc::new(OrderMirror::new(
            Arc::clone(&self.store),
            market,
            account,
            self.config.clone(),
        ));
        mirrors.insert(keys, Arc::clone(&mirror));
        (mirror, true)
    }

    /// Non-blocking lookup by exchange id. `None` for unknown markets.
    #[must_use]
    pub fn lookup(&self, market: &str, account: &str, id: &str) -> Option<OrderRecord> {
        self.get(market, account).and_then(|m| m.lookup(id))
    }

    /// Number of registered mirrors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no mirror is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every listener task.
    pub fn shutdown(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for MirrorRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::store::{InMemoryStore, LIVENESS_FIELD};
    use crate::types::Side;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = MirrorRegistry::new(Arc::new(InMemoryStore::new()), MirrorConfig::default());
        let a = registry.register("demo", "acc");
        let b = registry.register("demo", "acc");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        registry.register("demo", "other");
        assert_eq!(registry.len(), 2);
        assert!(registry.get("nope", "acc").is_none());
    }

    #[tokio::test]
    async fn test_listener_bootstraps_and_merges() {
        let store = InMemoryStore::new();
        let keys = StoreKeys::new("demo", "acc");
        store
            .hash_set(&keys.order_hash("BTC-USD"), LIVENESS_FIELD, "1")
            .await
            .unwrap();

        let registry = MirrorRegistry::new(Arc::new(store.clone()), MirrorConfig::default());
        let mirror = registry.get_or_spawn("demo", "acc");

        for _ in 0..100 {
            if mirror.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(mirror.is_ready());

        let mut order = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Buy, dec!(1), dec!(1), 1);
        order.acknowledge("1");
        let raw = serde_json::json!({ "1": order }).to_string();
        store.publish(&keys.order_channel(), &raw).await.unwrap();

        for _ in 0..100 {
            if registry.lookup("demo", "acc", "1").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registry.lookup("demo", "acc", "1").unwrap().client_id, "c-1");

        registry.shutdown();
    }
}
