//! Distributed rate governance.
//!
//! Every outbound exchange call goes through [`RateGovernor::try_acquire`],
//! which scores the call against two sliding windows kept in the shared
//! store: a weight budget and an order-count budget. A random slice of each
//! budget (about 10%, re-rolled per check) is held back from normal traffic
//! so cancels and emergency calls are not starved under load.
//!
//! Bans are separate: [`BanChannel`] holds the shared "banned until" time
//! that callers check before asking the governor.
//!
//! # Example
//!
//! ```rust,ignore
//! use order_reconciler::rate::{AcquireOptions, RateCategory, RateGovernor, RateGovernorConfig};
//!
//! let governor = RateGovernor::new(store, "main", RateGovernorConfig::default());
//! if governor.try_acquire("binance", 1, RateCategory::Normal, AcquireOptions::order()).await {
//!     // send the request
//! }
//! ```

mod ban;
mod governor;
mod log;
mod rule;

pub use ban::{BanChannel, BanStatus};
pub use governor::RateGovernor;
pub use log::{RateEntry, RateLog, RateScore};
pub use rule::{AcquireOptions, RateCategory, RateGovernorConfig, RateRule, WindowRule};
