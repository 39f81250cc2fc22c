//! Scriptable in-process exchange for tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::Decimal;
use crate::execution::adapter::{ExchangeAdapter, PlaceRequest};
use crate::store::{LIVENESS_FIELD, SharedStore, StoreKeys};
use crate::types::error::{SyncError, SyncResult};
use crate::types::{OrderRecord, OrderStatus, id_ordering, now_ms};

#[derive(Debug)]
enum PlaceScript {
    Fail(SyncError),
    AcceptThenFail(SyncError),
}

#[derive(Debug, Default)]
struct MockState {
    orders: HashMap<String, OrderRecord>,
    place_script: VecDeque<PlaceScript>,
    cancel_failures: VecDeque<SyncError>,
    query_failures: VecDeque<SyncError>,
    latency: Duration,
}

/// In-memory exchange implementing [`ExchangeAdapter`].
///
/// Orders get sequential numeric ids starting at 1000. Failures can be
/// scripted per call, including a placement that reaches the book but
/// whose response is lost. With [`MockExchangeAdapter::with_broadcast`]
/// every change is also written to the shared store and published on the
/// order channel, like an upstream order producer would.
pub struct MockExchangeAdapter {
    market: String,
    account: String,
    state: Mutex<MockState>,
    next_id: AtomicU64,
    broadcast: Option<Arc<dyn SharedStore>>,
    place_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl MockExchangeAdapter {
    /// Creates an empty exchange.
    #[must_use]
    pub fn new(market: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            account: account.into(),
            state: Mutex::new(MockState::default()),
            next_id: AtomicU64::new(1000),
            broadcast: None,
            place_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Mirrors every order change into `store`.
    #[must_use]
    pub fn with_broadcast(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.broadcast = Some(store);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Next placement fails without reaching the book.
    pub fn fail_next_place(&self, error: SyncError) {
        self.state().place_script.push_back(PlaceScript::Fail(error));
    }

    /// Next placement reaches the book but reports `error`.
    pub fn accept_then_fail_next_place(&self, error: SyncError) {
        self.state()
            .place_script
            .push_back(PlaceScript::AcceptThenFail(error));
    }

    /// Next cancel fails.
    pub fn fail_next_cancel(&self, error: SyncError) {
        self.state().cancel_failures.push_back(error);
    }

    /// Next query (by id or client id) fails.
    pub fn fail_next_query(&self, error: SyncError) {
        self.state().query_failures.push_back(error);
    }

    /// Adds an order to the book directly, assigning an id if missing.
    pub async fn insert_order(&self, mut record: OrderRecord) -> OrderRecord {
        if record.id.is_none() {
            record.acknowledge(self.next_id().to_string());
        }
        if let Some(id) = record.id.clone() {
            self.state().orders.insert(id, record.clone());
        }
        self.publish(&record).await;
        record
    }

    /// Fills an order up to `executed`, `maker` of it as maker.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::OrderNotExist` for unknown ids.
    pub async fn fill(&self, id: &str, executed: Decimal, maker: Decimal) -> SyncResult<OrderRecord> {
        let record = {
            let mut state = self.state();
            let order = state
                .orders
                .get_mut(id)
                .ok_or_else(|| SyncError::OrderNotExist(id.to_string()))?;
            order.set_executed(executed);
            order.maker_size = Some(maker);
            if order.remaining <= Decimal::ZERO {
                order.status = OrderStatus::Filled;
            }
            order.clone()
        };
        self.publish(&record).await;
        Ok(record)
    }

    /// Current book state of an order.
    #[must_use]
    pub fn order(&self, id: &str) -> Option<OrderRecord> {
        self.state().orders.get(id).cloned()
    }

    /// Every order carrying `client_id`, earliest first.
    #[must_use]
    pub fn orders_by_client_id(&self, client_id: &str) -> Vec<OrderRecord> {
        let mut found: Vec<OrderRecord> = self
            .state()
            .orders
            .values()
            .filter(|o| o.client_id == client_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| id_ordering(a.id.as_deref(), b.id.as_deref()));
        found
    }

    /// Number of `place` calls so far.
    #[must_use]
    pub fn place_calls(&self) -> usize {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Number of `cancel` calls so far.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Number of `query` and `query_by_client_id` calls so far.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn publish(&self, record: &OrderRecord) {
        let (Some(store), Some(id)) = (&self.broadcast, record.id.as_deref()) else {
            return;
        };
        let keys = StoreKeys::new(&self.market, &self.account);
        let result = async {
            let raw = serde_json::to_string(record)?;
            let hash = keys.order_hash(&record.pair);
            store
                .hash_set(&hash, LIVENESS_FIELD, &now_ms().to_string())
                .await?;
            store.hash_set(&hash, id, &raw).await?;
            let mut message = serde_json::Map::new();
            message.insert(id.to_string(), serde_json::to_value(record)?);
            store
                .publish(
                    &keys.order_channel(),
                    &serde_json::Value::Object(message).to_string(),
                )
                .await?;
            Ok::<(), SyncError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(market = %self.market, id, error = %e, "mock broadcast failed");
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    fn market(&self) -> &str {
        &self.market
    }

    fn account(&self) -> &str {
        &self.account
    }

    async fn place(&self, request: &PlaceRequest) -> SyncResult<OrderRecord> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let script = self.state().place_script.pop_front();
        let lost_response = match script {
            Some(PlaceScript::Fail(e)) => return Err(e),
            Some(PlaceScript::AcceptThenFail(e)) => Some(e),
            None => None,
        };

        let mut record = request.to_pending(&self.market, now_ms());
        record.acknowledge(self.next_id().to_string());
        if let Some(id) = record.id.clone() {
            self.state().orders.insert(id, record.clone());
        }
        self.publish(&record).await;

        match lost_response {
            Some(e) => Err(e),
            None => Ok(record),
        }
    }

    async fn cancel(&self, _pair: &str, id: &str) -> SyncResult<OrderRecord> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let record = {
            let mut state = self.state();
            if let Some(e) = state.cancel_failures.pop_front() {
                return Err(e);
            }
            let order = state
                .orders
                .get_mut(id)
                .ok_or_else(|| SyncError::OrderNotExist(id.to_string()))?;
            if !order.is_terminal() {
                order.status = OrderStatus::Canceled;
            }
            order.clone()
        };
        self.publish(&record).await;
        Ok(record)
    }

    async fn query(&self, _pair: &str, id: &str) -> SyncResult<OrderRecord> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(e) = state.query_failures.pop_front() {
            return Err(e);
        }
        state
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::OrderNotExist(id.to_string()))
    }

    async fn query_by_client_id(
        &self,
        _pair: &str,
        client_id: &str,
    ) -> SyncResult<Vec<OrderRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(e) = self.state().query_failures.pop_front() {
            return Err(e);
        }
        Ok(self.orders_by_client_id(client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::store::InMemoryStore;
    use crate::types::{ActionKind, Side};

    fn request() -> PlaceRequest {
        PlaceRequest::new("BTC-USD", Side::Buy, dec!(100), dec!(2)).with_client_id("c-1")
    }

    #[tokio::test]
    async fn test_place_cancel_query() {
        let exchange = MockExchangeAdapter::new("demo", "main");
        let placed = exchange.place(&request()).await.unwrap();
        assert_eq!(placed.id.as_deref(), Some("1000"));
        assert_eq!(placed.status, OrderStatus::New);
        assert_eq!(placed.maker_size, Some(dec!(0)));

        let canceled = exchange.cancel("BTC-USD", "1000").await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(
            exchange.query("BTC-USD", "1000").await.unwrap().status,
            OrderStatus::Canceled
        );
        assert!(matches!(
            exchange.query("BTC-USD", "9").await,
            Err(SyncError::OrderNotExist(_))
        ));
        assert_eq!(exchange.place_calls(), 1);
        assert_eq!(exchange.cancel_calls(), 1);
        assert_eq!(exchange.query_calls(), 2);
    }

    #[test]
    fn test_every_action_weighs_one_by_default() {
        let exchange = MockExchangeAdapter::new("demo", "main");
        for action in [ActionKind::New, ActionKind::Cancel, ActionKind::QueryNew] {
            assert_eq!(exchange.weight(action), 1);
        }
    }

    #[tokio::test]
    async fn test_lost_response_still_books_order() {
        let exchange = MockExchangeAdapter::new("demo", "main");
        exchange.accept_then_fail_next_place(SyncError::Timeout("place".to_string()));
        assert!(exchange.place(&request()).await.is_err());
        assert_eq!(exchange.orders_by_client_id("c-1").len(), 1);

        exchange.fail_next_place(SyncError::TransientNetwork("502".to_string()));
        assert!(exchange.place(&request()).await.is_err());
        assert_eq!(exchange.orders_by_client_id("c-1").len(), 1);
    }

    #[tokio::test]
    async fn test_fill_marks_filled() {
        let exchange = MockExchangeAdapter::new("demo", "main");
        let placed = exchange.place(&request()).await.unwrap();
        let id = placed.id.unwrap();
        let partial = exchange.fill(&id, dec!(1), dec!(1)).await.unwrap();
        assert_eq!(partial.status, OrderStatus::New);
        let full = exchange.fill(&id, dec!(2), dec!(1)).await.unwrap();
        assert_eq!(full.status, OrderStatus::Filled);
        assert_eq!(full.remaining, dec!(0));

        // filled orders stay filled on cancel
        let after = exchange.cancel("BTC-USD", &id).await.unwrap();
        assert_eq!(after.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_broadcast_writes_store_and_channel() {
        let store = InMemoryStore::new();
        let shared: Arc<dyn SharedStore> = Arc::new(store.clone());
        let exchange = MockExchangeAdapter::new("demo", "main").with_broadcast(Arc::clone(&shared));
        let keys = StoreKeys::new("demo", "main");
        let mut rx = shared.subscribe(&keys.order_channel()).await.unwrap();

        let placed = exchange.place(&request()).await.unwrap();
        let id = placed.id.unwrap();

        let hash = shared.hash_get_all(&keys.order_hash("BTC-USD")).await.unwrap();
        assert!(hash.contains_key(LIVENESS_FIELD));
        assert!(hash.contains_key(&id));
        assert!(rx.recv().await.unwrap().contains(&id));
    }
}
