//! Aggregate configuration of every component.

use serde::{Deserialize, Serialize};

use crate::balance::LedgerConfig;
use crate::execution::CoordinatorConfig;
use crate::mirror::MirrorConfig;
use crate::rate::RateGovernorConfig;
use crate::types::error::{SyncError, SyncResult};

/// Configuration of the mirror, rate governor, coordinator and ledger.
///
/// Missing sections and fields fall back to their defaults.
///
/// # Example
///
/// ```rust
/// use order_reconciler::config::ReconcilerConfig;
///
/// let config = ReconcilerConfig::from_json_str(
///     r#"{"mirror": {"min_eviction_threshold": 4096}, "coordinator": {"poll_interval_ms": 100}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.mirror.min_eviction_threshold, 4096);
/// assert_eq!(config.coordinator.poll_interval_ms, 100);
/// assert_eq!(config.rate.lock_ttl_ms, 2_000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Order mirror settings.
    pub mirror: MirrorConfig,
    /// Rate governor settings.
    pub rate: RateGovernorConfig,
    /// Coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Balance ledger settings.
    pub ledger: LedgerConfig,
}

impl ReconcilerConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` for malformed JSON and
    /// `SyncError::InvalidConfiguration` for invalid values.
    pub fn from_json_str(raw: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if encoding fails.
    pub fn to_json_string(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first `SyncError::InvalidConfiguration` found.
    pub fn validate(&self) -> SyncResult<()> {
        if self.mirror.min_eviction_threshold == 0 {
            return Err(SyncError::InvalidConfiguration(
                "mirror.min_eviction_threshold must be positive".to_string(),
            ));
        }
        self.rate.validate()?;
        self.coordinator.validate()?;
        self.ledger.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{MarketKind, RecoveryMode};

    #[test]
    fn test_empty_document_is_default() {
        let config = ReconcilerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
    }

    #[test]
    fn test_sections_parse() {
        let raw = r#"{
            "rate": {"emergency_fraction": 0.2, "default_rule": {"weight": {"max": 100, "seconds": 10.0}, "orders": {"max": 5, "seconds": 1.0}}},
            "ledger": {"market_kind": "futures", "recovery_mode": "recover_reserved"}
        }"#;
        let config = ReconcilerConfig::from_json_str(raw).unwrap();
        assert_eq!(config.rate.emergency_fraction, 0.2);
        assert_eq!(config.rate.default_rule.orders.max, 5);
        assert_eq!(config.ledger.market_kind, MarketKind::Futures);
        assert_eq!(config.ledger.recovery_mode, RecoveryMode::RecoverReserved);
    }

    #[test]
    fn test_round_trip_and_validation() {
        let config = ReconcilerConfig::default();
        let raw = config.to_json_string().unwrap();
        assert_eq!(ReconcilerConfig::from_json_str(&raw).unwrap(), config);

        let err = ReconcilerConfig::from_json_str(r#"{"coordinator": {"worker_pool_size": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration(_)));
        assert!(matches!(
            ReconcilerConfig::from_json_str("not json"),
            Err(SyncError::Serialization(_))
        ));
    }
}
