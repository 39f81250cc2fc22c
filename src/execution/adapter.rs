//! Exchange adapter trait and order requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Decimal;
use crate::types::error::SyncResult;
use crate::types::{ActionKind, OrderRecord, Side, generate_client_order_id};

/// Parameters of a new limit order.
///
/// # Example
///
/// ```rust
/// use order_reconciler::execution::PlaceRequest;
/// use order_reconciler::types::{OrderStatus, Side};
/// use order_reconciler::dec;
///
/// let request = PlaceRequest::new("BTC-USD", Side::Buy, dec!(100), dec!(2))
///     .with_client_id("BOT_1");
/// let pending = request.to_pending("demo", 1_000);
/// assert_eq!(pending.status, OrderStatus::Pending);
/// assert_eq!(pending.client_id, "BOT_1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRequest {
    /// Trading pair.
    pub pair: String,
    /// Client-assigned id, reused across retries of the same placement.
    pub client_id: String,
    /// Order side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Order size.
    pub size: Decimal,
    /// Opaque caller data copied into the resulting record.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl PlaceRequest {
    /// Creates a request with a freshly generated client id.
    #[must_use]
    pub fn new(pair: impl Into<String>, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            pair: pair.into(),
            client_id: generate_client_order_id("ORD"),
            side,
            price,
            size,
            data: Map::new(),
        }
    }

    /// Sets the client-assigned id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Attaches caller data.
    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Pending record describing this request before the exchange answers.
    #[must_use]
    pub fn to_pending(&self, market: &str, placed_at: u64) -> OrderRecord {
        let mut record = OrderRecord::new(
            market,
            self.pair.clone(),
            self.client_id.clone(),
            self.side,
            self.price,
            self.size,
            placed_at,
        );
        record.data = self.data.clone();
        record
    }
}

/// Exchange-specific collaborator behind the coordinator.
///
/// Implementations sign and send requests, normalize raw responses into
/// [`OrderRecord`]s and classify raw failures into
/// [`crate::types::SyncError`]: timeouts and dropped connections as
/// `Timeout`/`TransientNetwork`, unknown orders as `OrderNotExist`, duplicate
/// client ids as `OrderAlreadyPlaced`, bad price/size/balance as
/// `BusinessRejection`. Hard rejections are also published through
/// [`crate::rate::BanChannel`] by the adapter.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Market (exchange) name.
    fn market(&self) -> &str;

    /// Account name.
    fn account(&self) -> &str;

    /// Rate weight of one call of `action`.
    fn weight(&self, _action: ActionKind) -> u32 {
        1
    }

    /// Places a new order.
    async fn place(&self, request: &PlaceRequest) -> SyncResult<OrderRecord>;

    /// Cancels an order by exchange id.
    async fn cancel(&self, pair: &str, id: &str) -> SyncResult<OrderRecord>;

    /// Fetches an order by exchange id.
    async fn query(&self, pair: &str, id: &str) -> SyncResult<OrderRecord>;

    /// Fetches every order carrying a client-assigned id.
    async fn query_by_client_id(&self, pair: &str, client_id: &str)
    -> SyncResult<Vec<OrderRecord>>;
}
