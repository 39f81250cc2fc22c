//! Broadcast-fed replica of one market account's remote orders.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mirror::config::MirrorConfig;
use crate::mirror::message::{MirrorMessage, OrderPatch};
use crate::store::{LIVENESS_FIELD, SharedStore, StoreKeys};
use crate::types::error::{SyncError, SyncResult};
use crate::types::{OrderRecord, id_ordering};

#[derive(Debug, Default)]
struct MirrorState {
    orders: HashMap<String, OrderRecord>,
    ready: bool,
    size_at_bootstrap: usize,
}

/// Eventually consistent read replica of remote order state.
///
/// Answers "what does the exchange currently say about order X" without a
/// network round trip. Lookups never block and return `None` while the
/// market is not ready; `None` is never proof that an order does not exist.
///
/// Every change bumps a version counter observable through
/// [`OrderMirror::subscribe_updates`], which is how blocked coordinator
/// calls get woken.
pub struct OrderMirror {
    keys: StoreKeys,
    store: Arc<dyn SharedStore>,
    config: MirrorConfig,
    state: RwLock<MirrorState>,
    version: watch::Sender<u64>,
    bootstrap_guard: Mutex<()>,
}

impl std::fmt::Debug for OrderMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderMirror")
            .field("keys", &self.keys)
            .field("ready", &self.is_ready())
            .field("len", &self.len())
            .finish()
    }
}

impl OrderMirror {
    /// Creates a mirror that is not ready until its first bootstrap.
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        market: impl Into<String>,
        account: impl Into<String>,
        config: MirrorConfig,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            keys: StoreKeys::new(market, account),
            store,
            config,
            state: RwLock::new(MirrorState::default()),
            version,
            bootstrap_guard: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MirrorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MirrorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Market name.
    #[must_use]
    pub fn market(&self) -> &str {
        self.keys.market()
    }

    /// Account name.
    #[must_use]
    pub fn account(&self) -> &str {
        self.keys.account()
    }

    /// Returns true once a bootstrap succeeded and no CLEAR arrived since.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.read().ready
    }

    /// Number of mirrored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().orders.len()
    }

    /// Returns true if no order is mirrored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count above which the next merge forces a re-bootstrap.
    #[must_use]
    pub fn eviction_threshold(&self) -> usize {
        let state = self.read();
        self.config
            .min_eviction_threshold
            .max(state.size_at_bootstrap.saturating_mul(2))
    }

    /// Receiver that changes whenever the mirror changes.
    #[must_use]
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Latest record for an exchange order id.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<OrderRecord> {
        let state = self.read();
        if !state.ready {
            return None;
        }
        state.orders.get(id).cloned()
    }

    /// Latest record named by either exchange id or client id.
    ///
    /// When several orders share the client id, the earliest by exchange id
    /// wins.
    #[must_use]
    pub fn lookup_correlated(&self, correlation_id: &str) -> Option<OrderRecord> {
        let state = self.read();
        if !state.ready {
            return None;
        }
        if let Some(record) = state.orders.get(correlation_id) {
            return Some(record.clone());
        }
        state
            .orders
            .values()
            .filter(|o| o.client_id == correlation_id)
            .min_by(|a, b| id_ordering(a.id.as_deref(), b.id.as_deref()))
            .cloned()
    }

    /// Every mirrored order carrying `client_id`, earliest first.
    #[must_use]
    pub fn find_by_client_id(&self, client_id: &str) -> Vec<OrderRecord> {
        let state = self.read();
        if !state.ready {
            return Vec::new();
        }
        let mut found: Vec<OrderRecord> = state
            .orders
            .values()
            .filter(|o| o.client_id == client_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| id_ordering(a.id.as_deref(), b.id.as_deref()));
        found
    }

    /// Seeds the mirror with a REST-derived record unless a (fresher)
    /// broadcast value already exists. Returns true if written.
    ///
    /// Seeds never push the mirror past its eviction threshold; only
    /// broadcasts can trigger a re-bootstrap.
    pub fn write_if_absent(&self, id: &str, record: &OrderRecord) -> bool {
        let written = {
            let mut state = self.write();
            let threshold = self
                .config
                .min_eviction_threshold
                .max(state.size_at_bootstrap.saturating_mul(2));
            if state.orders.contains_key(id) {
                false
            } else if state.orders.len() >= threshold {
                debug!(
                    market = self.keys.market(),
                    id,
                    threshold,
                    "order mirror full, not seeding"
                );
                false
            } else {
                state.orders.insert(id.to_string(), record.clone());
                true
            }
        };
        if written {
            self.notify();
        }
        written
    }

    /// Drops an order the exchange no longer knows. Returns true if present.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.write().orders.remove(id).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    /// Drops every order and marks the market not ready.
    pub fn clear(&self) {
        {
            let mut state = self.write();
            state.orders.clear();
            state.ready = false;
        }
        info!(market = self.market(), account = self.account(), "order mirror cleared");
        self.notify();
    }

    /// Full resync from the shared store.
    ///
    /// Replaces the in-memory map atomically and marks the market ready.
    ///
    /// # Errors
    ///
    /// Fails, leaving the previous state untouched, when the store is
    /// unreachable or a pair hash lacks the liveness field (producer down).
    pub async fn bootstrap(&self) -> SyncResult<usize> {
        let _guard = self.bootstrap_guard.lock().await;
        let prefix = self.keys.order_prefix();

        let mut orders = HashMap::new();
        for key in self.store.keys(&prefix).await? {
            let fields = self.store.hash_get_all(&key).await?;
            if !fields.contains_key(LIVENESS_FIELD) {
                return Err(SyncError::StoreUnavailable(format!(
                    "order producer down for {}",
                    key
                )));
            }
            for (id, raw) in fields {
                if id == LIVENESS_FIELD {
                    continue;
                }
                match serde_json::from_str::<OrderPatch>(&raw)
                    .map_err(SyncError::from)
                    .and_then(|patch| merge_patch(None, &id, patch))
                {
                    Ok(record) => {
                        orders.insert(id, record);
                    }
                    Err(e) => warn!(key = %key, id = %id, error = %e, "skipping malformed order"),
                }
            }
        }

        let count = orders.len();
        {
            let mut state = self.write();
            state.orders = orders;
            state.ready = true;
            state.size_at_bootstrap = count;
        }
        info!(
            market = self.market(),
            account = self.account(),
            orders = count,
            "order mirror bootstrapped"
        );
        self.notify();
        Ok(count)
    }

    /// Bootstraps until it succeeds, backing off between attempts.
    pub async fn bootstrap_with_retry(&self) -> usize {
        let mut backoff = self.config.bootstrap_backoff();
        loop {
            match self.bootstrap().await {
                Ok(count) => return count,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        market = self.market(),
                        account = self.account(),
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "order mirror bootstrap failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Applies field-wise patches, last message wins per id.
    ///
    /// Returns true if the entry count now exceeds the eviction threshold.
    pub fn merge(&self, patches: Vec<(String, OrderPatch)>) -> bool {
        let over_threshold = {
            let mut state = self.write();
            for (id, patch) in patches {
                match merge_patch(state.orders.get(&id), &id, patch) {
                    Ok(record) => {
                        state.orders.insert(id, record);
                    }
                    Err(e) => debug!(id = %id, error = %e, "ignoring incomplete order patch"),
                }
            }
            let threshold = self
                .config
                .min_eviction_threshold
                .max(state.size_at_bootstrap.saturating_mul(2));
            state.orders.len() > threshold
        };
        self.notify();
        over_threshold
    }

    /// Handles one raw broadcast message.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` for unparseable payloads.
    pub async fn handle_message(&self, raw: &str) -> SyncResult<()> {
        match MirrorMessage::parse(raw)? {
            MirrorMessage::Clear => self.clear(),
            MirrorMessage::Online => {
                if !self.is_ready() {
                    self.bootstrap_with_retry().await;
                }
            }
            MirrorMessage::Merge(patches) => {
                if self.merge(patches) {
                    warn!(
                        market = self.market(),
                        account = self.account(),
                        entries = self.len(),
                        threshold = self.eviction_threshold(),
                        "order mirror over threshold, re-bootstrapping"
                    );
                    self.clear();
                    self.bootstrap_with_retry().await;
                }
            }
        }
        Ok(())
    }

    /// Spawns the background broadcast listener of this mirror.
    ///
    /// The listener subscribes first, then bootstraps, then applies
    /// messages until the channel closes. A lagged subscription triggers a
    /// full re-bootstrap.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mirror = Arc::clone(self);
        tokio::spawn(async move { mirror.run_listener().await })
    }

    async fn run_listener(&self) {
        let channel = self.keys.order_channel();
        let mut backoff = self.config.bootstrap_backoff();
        let mut rx = loop {
            match self.store.subscribe(&channel).await {
                Ok(rx) => break rx,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(channel = %channel, error = %e, "order channel subscribe failed");
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.bootstrap_with_retry().await;

        loop {
            match rx.recv().await {
                Ok(raw) => {
                    if let Err(e) = self.handle_message(&raw).await {
                        warn!(channel = %channel, error = %e, "bad order channel message");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "order channel lagged, re-bootstrapping");
                    self.clear();
                    self.bootstrap_with_retry().await;
                }
                Err(RecvError::Closed) => {
                    info!(channel = %channel, "order channel closed");
                    break;
                }
            }
        }
    }
}

/// Overlays `patch` onto `existing` (or onto nothing) and rebuilds the record.
fn merge_patch(
    existing: Option<&OrderRecord>,
    id: &str,
    patch: OrderPatch,
) -> SyncResult<OrderRecord> {
    let mut base = match existing {
        Some(record) => match serde_json::to_value(record)? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    };
    for (field, value) in patch {
        base.insert(field, value);
    }
    if base.get("id").is_none_or(Value::is_null) {
        base.insert("id".to_string(), Value::String(id.to_string()));
    }

    let mut record: OrderRecord = serde_json::from_value(Value::Object(base))?;
    record.normalize();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::store::InMemoryStore;
    use crate::types::{OrderStatus, Side};

    fn record(id: &str, client_id: &str) -> OrderRecord {
        let mut o = OrderRecord::new("demo", "BTC-USD", client_id, Side::Buy, dec!(100), dec!(2), 1);
        o.acknowledge(id);
        o
    }

    async fn seed(store: &InMemoryStore, ids: &[&str]) {
        let key = StoreKeys::new("demo", "acc").order_hash("BTC-USD");
        store.hash_set(&key, LIVENESS_FIELD, "1").await.unwrap();
        for id in ids {
            let json = serde_json::to_string(&record(id, &format!("c-{}", id))).unwrap();
            store.hash_set(&key, id, &json).await.unwrap();
        }
    }

    fn mirror(store: &InMemoryStore) -> OrderMirror {
        OrderMirror::new(
            Arc::new(store.clone()),
            "demo",
            "acc",
            MirrorConfig::default().with_bootstrap_backoff_ms(1, 5),
        )
    }

    #[tokio::test]
    async fn test_not_ready_until_bootstrap() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);

        assert!(!m.is_ready());
        assert!(m.lookup("1").is_none());

        assert_eq!(m.bootstrap().await.unwrap(), 1);
        assert!(m.is_ready());
        assert_eq!(m.lookup("1").unwrap().client_id, "c-1");
        assert_eq!(m.lookup_correlated("c-1").unwrap().id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_without_liveness_field() {
        let store = InMemoryStore::new();
        let key = StoreKeys::new("demo", "acc").order_hash("BTC-USD");
        let json = serde_json::to_string(&record("1", "c-1")).unwrap();
        store.hash_set(&key, "1", &json).await.unwrap();

        let m = mirror(&store);
        assert!(m.bootstrap().await.is_err());
        assert!(!m.is_ready());
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_store_down() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);
        store.set_available(false);

        assert!(matches!(
            m.bootstrap().await,
            Err(SyncError::StoreUnavailable(_))
        ));
        assert!(m.lookup("1").is_none());
    }

    #[tokio::test]
    async fn test_merge_is_field_wise_last_write_wins() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        m.handle_message(r#"{"1": {"executed": "0.5"}}"#).await.unwrap();
        m.handle_message(r#"{"1": {"executed": "1.5", "maker_size": "1"}}"#)
            .await
            .unwrap();

        let o = m.lookup("1").unwrap();
        assert_eq!(o.executed, dec!(1.5));
        assert_eq!(o.remaining, dec!(0.5));
        assert_eq!(o.maker_size, Some(dec!(1)));
        assert_eq!(o.price, dec!(100));
    }

    #[tokio::test]
    async fn test_merge_ignores_incomplete_unknown_order() {
        let store = InMemoryStore::new();
        seed(&store, &[]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        m.handle_message(r#"{"9": {"executed": "1"}}"#).await.unwrap();
        assert!(m.lookup("9").is_none());
    }

    #[tokio::test]
    async fn test_merge_new_order_fills_id_from_key() {
        let store = InMemoryStore::new();
        seed(&store, &[]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        let mut fresh = OrderRecord::new("demo", "BTC-USD", "c-9", Side::Sell, dec!(10), dec!(1), 1);
        fresh.status = OrderStatus::New;
        fresh.maker_size = Some(dec!(0));
        let raw = serde_json::json!({ "9": serde_json::to_string(&fresh).unwrap() }).to_string();
        m.handle_message(&raw).await.unwrap();

        let o = m.lookup("9").unwrap();
        assert_eq!(o.id.as_deref(), Some("9"));
        assert_eq!(o.side, Side::Sell);
    }

    #[tokio::test]
    async fn test_clear_and_online_signals() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        m.handle_message("SIGNAL/CLEAR").await.unwrap();
        assert!(!m.is_ready());
        assert!(m.is_empty());

        m.handle_message("SIGNAL/ONLINE").await.unwrap();
        assert!(m.is_ready());
        assert!(m.lookup("1").is_some());
    }

    #[tokio::test]
    async fn test_write_if_absent_and_delete() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        let stale = record("1", "other");
        assert!(!m.write_if_absent("1", &stale));
        assert_eq!(m.lookup("1").unwrap().client_id, "c-1");

        assert!(m.write_if_absent("2", &record("2", "c-2")));
        assert!(m.lookup("2").is_some());

        assert!(m.delete("2"));
        assert!(!m.delete("2"));
        assert!(m.lookup("2").is_none());
    }

    #[tokio::test]
    async fn test_updates_notify_waiters() {
        let store = InMemoryStore::new();
        seed(&store, &["1"]).await;
        let m = mirror(&store);
        let mut rx = m.subscribe_updates();
        rx.borrow_and_update();

        m.bootstrap().await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        m.handle_message(r#"{"1": {"status": "canceling"}}"#).await.unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_find_by_client_id_orders_earliest_first() {
        let store = InMemoryStore::new();
        seed(&store, &[]).await;
        let m = mirror(&store);
        m.bootstrap().await.unwrap();

        m.write_if_absent("12", &record("12", "dup"));
        m.write_if_absent("3", &record("3", "dup"));
        let found = m.find_by_client_id("dup");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id.as_deref(), Some("3"));
        assert_eq!(m.lookup_correlated("dup").unwrap().id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_eviction_threshold_uses_bootstrap_size() {
        let store = InMemoryStore::new();
        seed(&store, &["1", "2", "3"]).await;
        let m = OrderMirror::new(
            Arc::new(store.clone()),
            "demo",
            "acc",
            MirrorConfig::default().with_min_eviction_threshold(4),
        );
        m.bootstrap().await.unwrap();
        assert_eq!(m.eviction_threshold(), 6);
    }

    #[tokio::test]
    async fn test_seeding_stops_at_eviction_threshold() {
        let store = InMemoryStore::new();
        seed(&store, &[]).await;
        let m = OrderMirror::new(
            Arc::new(store.clone()),
            "demo",
            "acc",
            MirrorConfig::default().with_min_eviction_threshold(3),
        );
        m.bootstrap().await.unwrap();

        for id in ["1", "2", "3"] {
            assert!(m.write_if_absent(id, &record(id, "c")));
        }
        assert!(!m.write_if_absent("4", &record("4", "c")));
        assert_eq!(m.len(), 3);
        assert!(m.lookup("4").is_none());
        assert!(m.is_ready());
    }
}
