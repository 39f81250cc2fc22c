//! Key layout and lock tokens.

/// Hash field whose presence tells readers the upstream order producer is
/// alive.
pub const LIVENESS_FIELD: &str = "t";

/// Broadcast control message dropping a market's mirror.
pub const SIGNAL_CLEAR: &str = "SIGNAL/CLEAR";

/// Broadcast control message asking a market's mirror to bootstrap.
pub const SIGNAL_ONLINE: &str = "SIGNAL/ONLINE";

/// Proof of lock ownership returned by [`crate::store::SharedStore::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(pub u64);

/// Builds the store keys of one market account.
///
/// # Example
///
/// ```rust
/// use order_reconciler::store::StoreKeys;
///
/// let keys = StoreKeys::new("binance", "main");
/// assert_eq!(keys.order_hash("BTC-USD"), "binance:main:O:BTC-USD");
/// assert_eq!(keys.order_channel(), "binance:main:O_channel");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKeys {
    market: String,
    account: String,
}

impl StoreKeys {
    /// Creates the key builder.
    #[must_use]
    pub fn new(market: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            account: account.into(),
        }
    }

    /// Market name.
    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }

    /// Account name.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Prefix shared by every order hash of the account.
    #[must_use]
    pub fn order_prefix(&self) -> String {
        format!("{}:{}:O:", self.market, self.account)
    }

    /// Order hash of one pair, keyed by exchange order id.
    #[must_use]
    pub fn order_hash(&self, pair: &str) -> String {
        format!("{}{}", self.order_prefix(), pair)
    }

    /// Broadcast channel carrying order merges and control signals.
    #[must_use]
    pub fn order_channel(&self) -> String {
        format!("{}:{}:O_channel", self.market, self.account)
    }

    /// Rolling rate log.
    #[must_use]
    pub fn rate_log(&self) -> String {
        format!("{}:{}:RATE", self.market, self.account)
    }

    /// Lock guarding the rate log.
    #[must_use]
    pub fn rate_lock(&self) -> String {
        format!("{}:lock", self.rate_log())
    }

    /// Ban status key.
    #[must_use]
    pub fn ban(&self) -> String {
        format!("{}:{}:BAN", self.market, self.account)
    }

    /// Ban status broadcast channel.
    #[must_use]
    pub fn ban_channel(&self) -> String {
        format!("{}:{}:BAN_channel", self.market, self.account)
    }
}
