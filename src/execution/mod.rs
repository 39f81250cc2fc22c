//! Order actions against an exchange.
//!
//! # Overview
//!
//! - **Adapter**: [`ExchangeAdapter`] is the exchange-specific collaborator
//!   that sends requests and normalizes responses into order records.
//! - **Coordinator**: [`OrderCoordinator`] gates every call through the ban
//!   channel and the rate governor, races the REST call against the order
//!   mirror, and reconciles ambiguous placements.
//! - **Options**: [`PlaceOptions`], [`CancelOptions`] and [`QueryOptions`]
//!   select priority, best-effort mode and query timeouts.
//! - **Mock**: [`MockExchangeAdapter`] is a scriptable in-process exchange.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use order_reconciler::execution::{
//!     CoordinatorConfig, MockExchangeAdapter, OrderCoordinator, PlaceOptions, PlaceRequest,
//! };
//! use order_reconciler::mirror::{MirrorConfig, MirrorRegistry};
//! use order_reconciler::rate::{RateGovernor, RateGovernorConfig};
//! use order_reconciler::store::{InMemoryStore, SharedStore};
//! use order_reconciler::types::Side;
//! use order_reconciler::dec;
//!
//! # async fn run() -> order_reconciler::types::SyncResult<()> {
//! let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
//! let registry = MirrorRegistry::new(Arc::clone(&store), MirrorConfig::default());
//! let governor = Arc::new(RateGovernor::new(Arc::clone(&store), "main", RateGovernorConfig::default()));
//! let exchange = Arc::new(MockExchangeAdapter::new("demo", "main"));
//! let coordinator = OrderCoordinator::new(exchange, &registry, governor, CoordinatorConfig::default());
//!
//! let request = PlaceRequest::new("BTC-USD", Side::Buy, dec!(100), dec!(2));
//! if let Some(resolved) = coordinator.place(&request, PlaceOptions::default()).await? {
//!     println!("{:?} via {:?}", resolved.record.id, resolved.resolved_by);
//! }
//! # Ok(())
//! # }
//! ```

mod adapter;
mod config;
mod coordinator;
mod mock;
mod options;

pub use adapter::{ExchangeAdapter, PlaceRequest};
pub use config::CoordinatorConfig;
pub use coordinator::{OrderCoordinator, Resolved, ResolvedBy};
pub use mock::MockExchangeAdapter;
pub use options::{CancelOptions, PlaceOptions, QueryOptions, Wait};
