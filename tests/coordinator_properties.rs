use std::sync::Arc;
use std::time::{Duration, Instant};

use order_reconciler::execution::{CoordinatorConfig, MockExchangeAdapter};
use order_reconciler::prelude::*;
use order_reconciler::rate::RateGovernorConfig;
use serde_json::{Map, Value};

struct Harness {
    store: Arc<dyn SharedStore>,
    exchange: Arc<MockExchangeAdapter>,
    mirror: Arc<OrderMirror>,
    coordinator: OrderCoordinator,
}

async fn harness(exchange: MockExchangeAdapter) -> Harness {
    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    harness_on(store, exchange).await
}

async fn harness_on(store: Arc<dyn SharedStore>, exchange: MockExchangeAdapter) -> Harness {
    let exchange = Arc::new(exchange);
    let registry = MirrorRegistry::new(Arc::clone(&store), MirrorConfig::default());
    let mirror = registry.register("demo", "main");
    mirror.bootstrap().await.unwrap();
    let governor = Arc::new(RateGovernor::new(
        Arc::clone(&store),
        "main",
        RateGovernorConfig::default(),
    ));
    let bans = BanChannel::new(Arc::clone(&store), "demo", "main");
    let config = CoordinatorConfig::default()
        .with_poll_interval_ms(50)
        .with_ambiguous_wait_ms(2_000);
    let coordinator = OrderCoordinator::with_parts(
        exchange.clone(),
        Arc::clone(&mirror),
        bans,
        governor,
        config,
    );
    Harness {
        store,
        exchange,
        mirror,
        coordinator,
    }
}

fn merge_message(record: &OrderRecord) -> String {
    let mut message = Map::new();
    message.insert(
        record.id.clone().unwrap(),
        serde_json::to_value(record).unwrap(),
    );
    Value::Object(message).to_string()
}

fn request(client_id: &str) -> PlaceRequest {
    PlaceRequest::new("BTC-USD", Side::Buy, dec!(100), dec!(2)).with_client_id(client_id)
}

#[tokio::test]
async fn test_mirror_update_beats_slow_rest() {
    let exchange = MockExchangeAdapter::new("demo", "main");
    exchange.set_latency(Duration::from_secs(30));
    let h = harness(exchange).await;

    let mut seen = request("fast-1").to_pending("demo", 1);
    seen.acknowledge("7001");
    let inject = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.mirror.handle_message(&merge_message(&seen)).await.unwrap();
    };

    let started = Instant::now();
    let fast_request = request("fast-1");
    let (resolved, ()) = tokio::join!(
        h.coordinator.place(&fast_request, PlaceOptions::default()),
        inject
    );
    let resolved = resolved.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(resolved.resolved_by, ResolvedBy::Mirror);
    assert_eq!(resolved.record.id.as_deref(), Some("7001"));
    assert_eq!(resolved.record.status, OrderStatus::New);
    assert_eq!(h.exchange.place_calls(), 1);
}

#[tokio::test]
async fn test_query_answered_by_mirror_without_rest() {
    let h = harness(MockExchangeAdapter::new("demo", "main")).await;
    let mut known = request("q-1").to_pending("demo", 1);
    known.acknowledge("42");
    h.mirror.handle_message(&merge_message(&known)).await.unwrap();

    let resolved = h
        .coordinator
        .query(&known, QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.resolved_by, ResolvedBy::Mirror);
    assert_eq!(h.exchange.query_calls(), 0);
}

#[tokio::test]
async fn test_timed_out_place_revealed_by_mirror_returns_one_order() {
    let exchange = MockExchangeAdapter::new("demo", "main");
    exchange.accept_then_fail_next_place(SyncError::Timeout("place".to_string()));
    let h = harness(exchange).await;

    let reveal = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let booked = h.exchange.orders_by_client_id("amb-1");
        assert_eq!(booked.len(), 1);
        h.mirror
            .handle_message(&merge_message(&booked[0]))
            .await
            .unwrap();
        booked[0].clone()
    };

    let amb_request = request("amb-1");
    let (resolved, booked) = tokio::join!(
        h.coordinator.place(&amb_request, PlaceOptions::default()),
        reveal
    );
    let resolved = resolved.unwrap().unwrap();

    assert_eq!(resolved.resolved_by, ResolvedBy::Ambiguous);
    assert_eq!(resolved.record.id, booked.id);
    assert_eq!(h.exchange.place_calls(), 1);
    assert_eq!(h.exchange.cancel_calls(), 0);
    assert_eq!(h.exchange.query_calls(), 0);
    assert_eq!(h.exchange.orders_by_client_id("amb-1").len(), 1);
}

#[tokio::test]
async fn test_timed_out_place_with_live_broadcast_returns_one_order() {
    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    let exchange = MockExchangeAdapter::new("demo", "main").with_broadcast(Arc::clone(&store));
    exchange.accept_then_fail_next_place(SyncError::TransientNetwork("reset".to_string()));
    let h = harness_on(Arc::clone(&store), exchange).await;

    // feed the mirror from the order channel like the registry listener does
    let mut rx = h
        .store
        .subscribe(&order_reconciler::store::StoreKeys::new("demo", "main").order_channel())
        .await
        .unwrap();
    let mirror = Arc::clone(&h.mirror);
    let feeder = tokio::spawn(async move {
        while let Ok(raw) = rx.recv().await {
            mirror.handle_message(&raw).await.unwrap();
        }
    });

    let resolved = h
        .coordinator
        .place(&request("amb-2"), PlaceOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.record.client_id, "amb-2");
    assert!(resolved.record.id.is_some());
    assert_eq!(h.exchange.orders_by_client_id("amb-2").len(), 1);
    assert_eq!(h.exchange.place_calls(), 1);
    feeder.abort();
}

#[tokio::test]
async fn test_place_then_fill_feeds_ledger_once() {
    let h = harness(MockExchangeAdapter::new("demo", "main")).await;
    let mut ledger = BalanceLedger::new(LedgerConfig::default(), 0);
    ledger.set_cash("USD", dec!(300));

    let placed = h
        .coordinator
        .place(&request("led-1"), PlaceOptions::default())
        .await
        .unwrap()
        .unwrap()
        .record;
    ledger.apply(&placed, OrderEvent::JustPlaced).unwrap();
    // the same answer delivered again
    ledger.apply(&placed, OrderEvent::Changed).unwrap();
    assert_eq!(ledger.balance("USD").reserved, dec!(200));

    let id = placed.id.clone().unwrap();
    let filled = h.exchange.fill(&id, dec!(1), dec!(1)).await.unwrap();
    h.mirror.handle_message(&merge_message(&filled)).await.unwrap();
    let queried = h
        .coordinator
        .query(&placed, QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queried.record.executed, dec!(1));
    ledger.apply(&queried.record, OrderEvent::Changed).unwrap();

    let canceled = h
        .coordinator
        .cancel(&queried.record, CancelOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(canceled.record.status, OrderStatus::Canceled);
    ledger.apply(&canceled.record, OrderEvent::Canceled).unwrap();

    assert_eq!(ledger.balance("USD").reserved, dec!(0));
    assert_eq!(ledger.balance("USD").cash, dec!(200));
    assert_eq!(ledger.balance("BTC").cash, dec!(1));
}
