//! Multi-process sliding-window rate governor.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::rate::log::{RateEntry, RateLog, RateScore};
use crate::rate::rule::{AcquireOptions, RateCategory, RateGovernorConfig, RateRule};
use crate::store::{LockToken, SharedStore, StoreKeys};
use crate::types::error::SyncResult;
use crate::types::now_ms;

/// Rolled per check so competing processes do not contend in lockstep.
#[derive(Debug, Clone, Copy)]
struct Reservation {
    weight: u32,
    orders: u32,
    sample_rejection: bool,
}

/// Enforces `N weight / T seconds` and `M orders / T2 seconds` budgets shared
/// by every process of one exchange account.
///
/// Each check runs under a short-TTL lock on the market's rate log, which is
/// always released afterwards. The governor never raises: store failures
/// and lock give-ups simply deny the call.
///
/// Ban state is not the governor's business; callers check
/// [`crate::rate::BanChannel`] before calling [`RateGovernor::try_acquire`].
pub struct RateGovernor {
    store: Arc<dyn SharedStore>,
    account: String,
    config: RateGovernorConfig,
}

impl RateGovernor {
    /// Creates a governor for one account.
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        account: impl Into<String>,
        config: RateGovernorConfig,
    ) -> Self {
        Self {
            store,
            account: account.into(),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RateGovernorConfig {
        &self.config
    }

    /// Returns true if a call of `weight_cost` in `category` may go out now,
    /// recording it against the shared budget.
    ///
    /// Blocks while another process holds the rate-log lock. Without
    /// `max_lock_rounds` this waits indefinitely; it never proceeds without
    /// holding the lock.
    pub async fn try_acquire(
        &self,
        market: &str,
        weight_cost: u32,
        category: RateCategory,
        opts: AcquireOptions,
    ) -> bool {
        if category == RateCategory::Handshake {
            return true;
        }

        let keys = StoreKeys::new(market, &self.account);
        let lock_key = keys.rate_lock();
        let Some(token) = self.lock(&lock_key, market, opts).await else {
            return false;
        };

        let result = self
            .score_and_record(&keys, market, weight_cost, category, opts.is_order)
            .await;

        self.unlock(&lock_key, &token).await;

        match result {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(market, error = %e, "rate check failed, denying call");
                false
            }
        }
    }

    /// Current usage of a market as last written.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the log is malformed.
    pub async fn score(&self, market: &str) -> SyncResult<RateScore> {
        let keys = StoreKeys::new(market, &self.account);
        let now = now_ms();
        let mut log = self.load(&keys, self.config.rule_for(market)).await?;
        log.trim(now);
        log.refresh_score(now);
        Ok(log.score)
    }

    async fn lock(&self, lock_key: &str, market: &str, opts: AcquireOptions) -> Option<LockToken> {
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        let retry = Duration::from_millis(self.config.lock_retry_ms);
        let mut rounds: u32 = 0;
        loop {
            match self.store.try_lock(lock_key, ttl).await {
                Ok(Some(token)) => return Some(token),
                Ok(None) => {}
                Err(e) => debug!(market, error = %e, "rate lock attempt failed"),
            }
            rounds = rounds.saturating_add(1);
            if let Some(max) = opts.max_lock_rounds {
                if rounds >= max {
                    warn!(market, rounds, "giving up on rate lock");
                    return None;
                }
            }
            tokio::time::sleep(retry).await;
        }
    }

    async fn unlock(&self, lock_key: &str, token: &LockToken) {
        match self.store.unlock(lock_key, token).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = lock_key, "rate lock expired before release"),
            Err(e) => warn!(lock = lock_key, error = %e, "rate lock release failed"),
        }
    }

    fn roll_reservation(&self, rule: &RateRule) -> Reservation {
        let mut rng = rand::thread_rng();
        let fraction = self.config.emergency_fraction;
        let mut reserve = |max: u32| -> u32 {
            if fraction <= 0.0 {
                return 0;
            }
            let share = fraction * rng.gen_range(0.5..1.5);
            ((f64::from(max) * share).round() as u32).min(max)
        };
        let weight = reserve(rule.weight.max);
        let orders = reserve(rule.orders.max);
        let sample_rate = self.config.rejected_sample_rate.clamp(0.0, 1.0);
        Reservation {
            weight,
            orders,
            sample_rejection: rng.gen_bool(sample_rate),
        }
    }

    async fn load(&self, keys: &StoreKeys, rule: &RateRule) -> SyncResult<RateLog> {
        let mut log = match self.store.get(&keys.rate_log()).await? {
            Some(raw) => serde_json::from_str::<RateLog>(&raw).unwrap_or_else(|e| {
                warn!(key = %keys.rate_log(), error = %e, "discarding malformed rate log");
                RateLog::default()
            }),
            None => RateLog::default(),
        };
        log.rule = rule.clone();
        Ok(log)
    }

    async fn save(&self, keys: &StoreKeys, log: &RateLog) -> SyncResult<()> {
        let raw = serde_json::to_string(log)?;
        self.store.set(&keys.rate_log(), &raw).await
    }

    async fn score_and_record(
        &self,
        keys: &StoreKeys,
        market: &str,
        weight_cost: u32,
        category: RateCategory,
        is_order: bool,
    ) -> SyncResult<bool> {
        let rule = self.config.rule_for(market).clone();
        let reservation = self.roll_reservation(&rule);

        let mut log = self.load(keys, &rule).await?;
        let now = now_ms();
        log.trim(now);

        let weight_score = log.weight_score(now);
        let order_score = log.order_score(now);
        let (weight_ceiling, order_ceiling) =
            category.ceilings(&rule, reservation.weight, reservation.orders);

        let allowed = weight_score.saturating_add(weight_cost) <= weight_ceiling
            && (!is_order || order_score.saturating_add(1) <= order_ceiling);

        if allowed {
            log.history.push(RateEntry(now, weight_cost, is_order));
            log.refresh_score(now);
            self.save(keys, &log).await?;
        } else {
            debug!(
                market,
                ?category,
                weight_score,
                order_score,
                weight_ceiling,
                order_ceiling,
                "rate budget exhausted"
            );
            if reservation.sample_rejection {
                log.score.rejected = log.score.rejected.saturating_add(1);
                log.refresh_score(now);
                self.save(keys, &log).await?;
            }
        }
        Ok(allowed)
    }
}
