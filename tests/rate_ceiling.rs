use std::sync::Arc;
use std::time::Duration;

use order_reconciler::prelude::*;
use order_reconciler::rate::{RateGovernorConfig, WindowRule};

fn governor(store: &InMemoryStore, window_seconds: f64) -> RateGovernor {
    let config = RateGovernorConfig::default()
        .with_default_rule(RateRule::new(
            WindowRule::new(10, window_seconds),
            WindowRule::new(1_000, window_seconds),
        ))
        .with_emergency_fraction(0.0)
        .with_rejected_sample_rate(0.0)
        .with_lock_timing_ms(2_000, 1);
    RateGovernor::new(Arc::new(store.clone()), "main", config)
}

/// Fires `calls` concurrent weight-1 acquisitions spread over `governors`.
async fn burst(governors: &[Arc<RateGovernor>], calls: usize) -> usize {
    let handles: Vec<_> = (0..calls)
        .map(|i| {
            let governor = Arc::clone(&governors[i % governors.len()]);
            tokio::spawn(async move {
                governor
                    .try_acquire("demo", 1, RateCategory::Normal, AcquireOptions::weight_only())
                    .await
            })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }
    granted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_ceiling_calls_per_window() {
    let store = InMemoryStore::new();
    // two governors stand in for two processes sharing one account
    let governors = vec![
        Arc::new(governor(&store, 2.0)),
        Arc::new(governor(&store, 2.0)),
    ];

    assert_eq!(burst(&governors, 50).await, 10);
    assert_eq!(governors[0].score("demo").await.unwrap().weight, 10);

    tokio::time::sleep(Duration::from_millis(2_200)).await;
    assert_eq!(burst(&governors, 50).await, 10);
}

#[tokio::test]
async fn test_handshake_is_free_and_unscored() {
    let store = InMemoryStore::new();
    let governor = governor(&store, 60.0);
    for _ in 0..20 {
        assert!(
            governor
                .try_acquire("demo", 5, RateCategory::Handshake, AcquireOptions::order())
                .await
        );
    }
    assert_eq!(governor.score("demo").await.unwrap().weight, 0);
}

#[tokio::test]
async fn test_unreachable_store_denies() {
    let store = InMemoryStore::new();
    let governor = governor(&store, 60.0);
    store.set_available(false);
    assert!(
        !governor
            .try_acquire(
                "demo",
                1,
                RateCategory::Emergency,
                AcquireOptions::weight_only().give_up_after(3)
            )
            .await
    );
}

#[tokio::test]
async fn test_markets_have_independent_budgets() {
    let store = InMemoryStore::new();
    let governor = governor(&store, 60.0);
    for _ in 0..10 {
        assert!(
            governor
                .try_acquire("demo", 1, RateCategory::Normal, AcquireOptions::weight_only())
                .await
        );
    }
    assert!(
        !governor
            .try_acquire("demo", 1, RateCategory::Normal, AcquireOptions::weight_only())
            .await
    );
    assert!(
        governor
            .try_acquire("other", 1, RateCategory::Normal, AcquireOptions::weight_only())
            .await
    );
}
