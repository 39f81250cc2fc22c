//! Error types shared by every component.

use thiserror::Error;

/// Business rejection reasons reported by an exchange adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Not enough free balance to place the order.
    InsufficientBalance,
    /// Price outside the allowed range or tick.
    InvalidPrice,
    /// Size outside the allowed range or lot.
    InvalidSize,
    /// Any other terminal rejection.
    Other,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBalance => write!(f, "insufficient balance"),
            Self::InvalidPrice => write!(f, "invalid price"),
            Self::InvalidSize => write!(f, "invalid size"),
            Self::Other => write!(f, "rejected"),
        }
    }
}

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, surfaced once the retry budget is exhausted.
    TransientNetwork,
    /// Caller must wait for the published ban-until time.
    RateLimited,
    /// Remote effect unknown; requires reconciliation before acting again.
    AmbiguousOutcome,
    /// Terminal, never blindly retried.
    BusinessRejection,
    /// Fatal for the affected order; never swallowed.
    DataIntegrityViolation,
    /// Local plumbing failure (store, serialization, configuration).
    Internal,
}

/// Error type for order reconciliation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or 5xx failure with no definitive response.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Request timed out after submission.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Rate budget exhausted for the market.
    #[error("rate limited on market {0}")]
    RateLimited(String),

    /// Account banned by the exchange until the given time.
    #[error("banned until {until}: {reason}")]
    Banned {
        /// Ban expiry in milliseconds since the epoch.
        until: u64,
        /// Reason published with the ban.
        reason: String,
    },

    /// The exchange does not know the order.
    #[error("order does not exist: {0}")]
    OrderNotExist(String),

    /// Placement outcome unknown; the order may exist on the exchange.
    #[error("order might be placed: {0}")]
    OrderMightBePlaced(String),

    /// Duplicate placement detected for the same client id.
    #[error("order already placed: {0}")]
    OrderAlreadyPlaced(String),

    /// Terminal business rejection.
    #[error("{kind}: {message}")]
    BusinessRejection {
        /// Rejection reason.
        kind: RejectionKind,
        /// Exchange message.
        message: String,
    },

    /// State that cannot be reconciled automatically.
    #[error("data integrity violation: {0}")]
    DataIntegrityViolation(String),

    /// A field required to be non-null was missing.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A bounded query did not resolve and the caller asked to fail.
    #[error("query unresolved: {0}")]
    QueryUnresolved(String),

    /// Shared store unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed stored or broadcast payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid local state.
    #[error("invalid market state: {0}")]
    InvalidMarketState(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl SyncError {
    /// Shorthand for a business rejection.
    #[must_use]
    pub fn rejection(kind: RejectionKind, message: impl Into<String>) -> Self {
        SyncError::BusinessRejection {
            kind,
            message: message.into(),
        }
    }

    /// Returns the failure class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransientNetwork(_) | Self::Timeout(_) => ErrorClass::TransientNetwork,
            Self::RateLimited(_) | Self::Banned { .. } => ErrorClass::RateLimited,
            Self::OrderMightBePlaced(_) | Self::OrderAlreadyPlaced(_) => {
                ErrorClass::AmbiguousOutcome
            }
            Self::OrderNotExist(_) | Self::BusinessRejection { .. } | Self::QueryUnresolved(_) => {
                ErrorClass::BusinessRejection
            }
            Self::DataIntegrityViolation(_) | Self::MissingField(_) => {
                ErrorClass::DataIntegrityViolation
            }
            Self::StoreUnavailable(_)
            | Self::Serialization(_)
            | Self::InvalidConfiguration(_)
            | Self::InvalidMarketState(_) => ErrorClass::Internal,
        }
    }

    /// Returns true for failures worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::TransientNetwork)
    }

    /// Returns true when a place request may or may not have reached the
    /// exchange.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::Timeout(_) | Self::OrderAlreadyPlaced(_)
        )
    }

    /// Returns true for errors that must propagate even in `allow_fail` mode.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataIntegrityViolation(_) | Self::MissingField(_) | Self::OrderMightBePlaced(_)
        )
    }
}

/// Result type alias for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;
