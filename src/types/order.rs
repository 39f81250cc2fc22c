//! Order record shared by the mirror, the coordinator and the ledger.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Decimal;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side.
    Buy,
    /// Sell side.
    Sell,
}

impl Side {
    /// Returns `1` for buys and `-1` for sells.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Remote order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Submitted locally, not yet acknowledged by the exchange.
    Pending,
    /// Resting on the book.
    New,
    /// Cancel requested, not yet confirmed.
    Canceling,
    /// Completely filled.
    Filled,
    /// Canceled, possibly after partial fills.
    Canceled,
}

impl OrderStatus {
    /// Returns true for statuses no further update can leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled)
    }
}

/// Kind of logical order action handled by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Place a new order.
    New,
    /// Cancel an existing order.
    Cancel,
    /// Query the state of a (recently placed) order.
    QueryNew,
}

impl ActionKind {
    /// Returns true when `record` already answers this action, so no REST
    /// round trip is needed.
    #[must_use]
    pub fn is_resolved_by(&self, record: &OrderRecord) -> bool {
        match self {
            ActionKind::New => record.status != OrderStatus::Pending,
            ActionKind::Cancel => record.is_terminal(),
            ActionKind::QueryNew => true,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::New => write!(f, "new"),
            ActionKind::Cancel => write!(f, "cancel"),
            ActionKind::QueryNew => write!(f, "query_new"),
        }
    }
}

/// Normalized view of one exchange order.
///
/// `remaining` always equals `size - executed`; use [`OrderRecord::set_executed`]
/// rather than writing `executed` directly.
///
/// # Example
///
/// ```rust
/// use order_reconciler::types::{OrderRecord, OrderStatus, Side};
/// use order_reconciler::dec;
///
/// let mut order = OrderRecord::new("demo", "BTC-USD", "c-1", Side::Buy, dec!(100), dec!(2), 1000);
/// assert_eq!(order.status, OrderStatus::Pending);
///
/// order.acknowledge("42");
/// order.set_executed(dec!(0.5));
/// assert_eq!(order.remaining, dec!(1.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Market (exchange) name.
    pub market: String,
    /// Trading pair, e.g. `BTC-USD`.
    pub pair: String,
    /// Client-assigned id.
    pub client_id: String,
    /// Exchange-assigned id, unknown while pending.
    #[serde(default)]
    pub id: Option<String>,
    /// Order side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Original size.
    pub size: Decimal,
    /// Filled size.
    pub executed: Decimal,
    /// Unfilled size.
    pub remaining: Decimal,
    /// Portion of `executed` filled as maker.
    #[serde(default)]
    pub maker_size: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Placement timestamp in milliseconds.
    pub placed_at: u64,
    /// Opaque caller data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl OrderRecord {
    /// Creates a pending order record.
    #[must_use]
    pub fn new(
        market: impl Into<String>,
        pair: impl Into<String>,
        client_id: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
        placed_at: u64,
    ) -> Self {
        Self {
            market: market.into(),
            pair: pair.into(),
            client_id: client_id.into(),
            id: None,
            side,
            price,
            size,
            executed: Decimal::ZERO,
            remaining: size,
            maker_size: None,
            status: OrderStatus::Pending,
            placed_at,
            data: Map::new(),
        }
    }

    /// Marks the order as accepted by the exchange under `id`.
    pub fn acknowledge(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::New;
        }
        if self.maker_size.is_none() {
            self.maker_size = Some(Decimal::ZERO);
        }
    }

    /// Sets the filled size and keeps `remaining` consistent.
    pub fn set_executed(&mut self, executed: Decimal) {
        self.executed = executed;
        self.remaining = self.size - executed;
    }

    /// Builder variant of [`OrderRecord::set_executed`].
    #[must_use]
    pub fn with_executed(mut self, executed: Decimal) -> Self {
        self.set_executed(executed);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the maker-filled size.
    #[must_use]
    pub fn with_maker_size(mut self, maker_size: Decimal) -> Self {
        self.maker_size = Some(maker_size);
        self
    }

    /// Recomputes `remaining` from `size` and `executed`.
    pub fn normalize(&mut self) {
        self.remaining = self.size - self.executed;
    }

    /// Identity used for bookkeeping: the exchange id once known, else the
    /// client id.
    #[must_use]
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.client_id)
    }

    /// Returns true if `correlation_id` names this order by either id.
    #[must_use]
    pub fn matches(&self, correlation_id: &str) -> bool {
        self.client_id == correlation_id || self.id.as_deref() == Some(correlation_id)
    }

    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the order may still rest on the book.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Taker-filled size, when the maker split is known.
    #[must_use]
    pub fn taker_size(&self) -> Option<Decimal> {
        self.maker_size.map(|maker| self.executed - maker)
    }
}

/// Orders exchange ids "earliest first".
///
/// Numeric ids compare numerically, anything else lexicographically, and
/// missing ids sort last.
#[must_use]
pub fn id_ordering(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<u128>(), b.parse::<u128>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
