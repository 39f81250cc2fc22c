//! Reconciles REST results, mirror updates and ambiguous outcomes into one
//! authoritative record per order action.

use std::collections::HashMap;
use std::future::{Future, pending};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::Decimal;
use crate::execution::adapter::{ExchangeAdapter, PlaceRequest};
use crate::execution::config::CoordinatorConfig;
use crate::execution::options::{CancelOptions, PlaceOptions, QueryOptions, Wait};
use crate::mirror::{MirrorRegistry, OrderMirror};
use crate::rate::{AcquireOptions, BanChannel, RateCategory, RateGovernor};
use crate::types::error::{SyncError, SyncResult};
use crate::types::{ActionKind, OrderRecord, OrderStatus, id_ordering, now_ms};

type RestHandle = JoinHandle<SyncResult<OrderRecord>>;

/// Which view produced the authoritative record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// The order mirror answered first.
    Mirror,
    /// The REST call answered first.
    Rest,
    /// The reconciliation protocol of an ambiguous placement.
    Ambiguous,
    /// A bounded wait ran out; the record is the best known one.
    Stale,
}

/// Authoritative outcome of one order action.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The order as reconciled.
    pub record: OrderRecord,
    /// How it was obtained.
    pub resolved_by: ResolvedBy,
}

enum Event {
    Rest(Result<SyncResult<OrderRecord>, JoinError>),
    Wake,
    Recheck,
    Deadline,
}

/// Turns one logical order action into exactly one authoritative record.
///
/// One coordinator serves one market account. Every action:
///
/// 1. answers from the [`OrderMirror`] when it already knows the outcome,
/// 2. otherwise checks the ban channel and waits for rate budget,
/// 3. runs the REST call on a bounded worker pool while watching the
///    mirror, returning whichever view resolves the action first.
///
/// A placement whose outcome is unknown (timeout, dropped connection,
/// duplicate client id) is never retried blindly: the coordinator looks for
/// the order by client id, cancels duplicates and returns a single record,
/// or fails with `OrderMightBePlaced` when it cannot tell.
///
/// `executed` never goes backwards through the coordinator: regressions are
/// logged and replaced by the highest value seen.
pub struct OrderCoordinator {
    adapter: Arc<dyn ExchangeAdapter>,
    mirror: Arc<OrderMirror>,
    bans: BanChannel,
    governor: Arc<RateGovernor>,
    config: CoordinatorConfig,
    workers: Arc<Semaphore>,
    high_water: Arc<Mutex<HashMap<String, Decimal>>>,
}

impl std::fmt::Debug for OrderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCoordinator")
            .field("market", &self.market())
            .field("account", &self.account())
            .field("config", &self.config)
            .finish()
    }
}

impl OrderCoordinator {
    /// Creates a coordinator for the adapter's market account, spawning its
    /// mirror listener if the registry has none yet.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        registry: &MirrorRegistry,
        governor: Arc<RateGovernor>,
        config: CoordinatorConfig,
    ) -> Self {
        let mirror = registry.get_or_spawn(adapter.market(), adapter.account());
        let bans = BanChannel::new(
            Arc::clone(registry.store()),
            adapter.market(),
            adapter.account(),
        );
        Self::with_parts(adapter, mirror, bans, governor, config)
    }

    /// Creates a coordinator from explicit parts.
    #[must_use]
    pub fn with_parts(
        adapter: Arc<dyn ExchangeAdapter>,
        mirror: Arc<OrderMirror>,
        bans: BanChannel,
        governor: Arc<RateGovernor>,
        config: CoordinatorConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            adapter,
            mirror,
            bans,
            governor,
            config,
            workers,
            high_water: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Market name.
    #[must_use]
    pub fn market(&self) -> &str {
        self.adapter.market()
    }

    /// Account name.
    #[must_use]
    pub fn account(&self) -> &str {
        self.adapter.account()
    }

    /// Mirror of this market account.
    #[must_use]
    pub fn mirror(&self) -> &Arc<OrderMirror> {
        &self.mirror
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Drops the executed high-water mark of an order the caller is done
    /// with.
    pub fn forget(&self, key: &str) -> bool {
        self.high_water
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Places a new order.
    ///
    /// A lost response enters the ambiguous reconciliation protocol instead
    /// of being retried.
    ///
    /// # Errors
    ///
    /// - `SyncError::Banned` / `SyncError::RateLimited` before sending
    /// - `SyncError::BusinessRejection` from the exchange
    /// - `SyncError::OrderMightBePlaced` when the outcome cannot be determined
    /// - `SyncError::DataIntegrityViolation` when several duplicates filled
    ///
    /// With `allow_fail`, every error but the last two becomes `Ok(None)`.
    pub async fn place(
        &self,
        request: &PlaceRequest,
        opts: PlaceOptions,
    ) -> SyncResult<Option<Resolved>> {
        let pending = request.to_pending(self.market(), now_ms());
        let result = async {
            if let Some(resolved) = self.from_mirror(&pending, ActionKind::New) {
                return Ok(resolved);
            }
            self.gate(ActionKind::New, opts.priority).await?;
            let adapter = Arc::clone(&self.adapter);
            let request = request.clone();
            self.execute(&pending, ActionKind::New, Wait::UntilResolved, move || async move {
                adapter.place(&request).await
            })
            .await
        }
        .await;
        settle(result, opts.allow_fail)
    }

    /// Cancels an order, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - `SyncError::OrderNotExist` if the exchange does not know the order
    /// - `SyncError::InvalidMarketState` if the order has no exchange id
    /// - ban, rate and transient errors once retries are exhausted
    pub async fn cancel(
        &self,
        order: &OrderRecord,
        opts: CancelOptions,
    ) -> SyncResult<Option<Resolved>> {
        let result = self
            .retry_transient(ActionKind::Cancel, order.key(), || {
                self.cancel_once(order, opts.priority)
            })
            .await;
        settle(result, opts.allow_fail)
    }

    /// Queries an order, waiting at most `opts.timeout`.
    ///
    /// On timeout the best-known record is returned with
    /// [`ResolvedBy::Stale`] unless `fail_if_unresolved` is set.
    ///
    /// # Errors
    ///
    /// - `SyncError::OrderNotExist` if the exchange does not know the order
    /// - `SyncError::QueryUnresolved` on timeout without a usable record
    /// - ban, rate and transient errors once retries are exhausted
    pub async fn query(
        &self,
        order: &OrderRecord,
        opts: QueryOptions,
    ) -> SyncResult<Option<Resolved>> {
        let result = self
            .retry_transient(ActionKind::QueryNew, order.key(), || {
                self.query_once(order, opts)
            })
            .await;
        settle(result, opts.allow_fail)
    }

    async fn cancel_once(&self, order: &OrderRecord, priority: RateCategory) -> SyncResult<Resolved> {
        if let Some(resolved) = self.from_mirror(order, ActionKind::Cancel) {
            return Ok(resolved);
        }
        let id = order.id.clone().ok_or_else(|| {
            SyncError::InvalidMarketState(format!(
                "order {} has no exchange id to cancel",
                order.client_id
            ))
        })?;
        self.gate(ActionKind::Cancel, priority).await?;
        let adapter = Arc::clone(&self.adapter);
        let pair = order.pair.clone();
        self.execute(order, ActionKind::Cancel, Wait::UntilResolved, move || async move {
            adapter.cancel(&pair, &id).await
        })
        .await
    }

    async fn query_once(&self, order: &OrderRecord, opts: QueryOptions) -> SyncResult<Resolved> {
        if let Some(resolved) = self.from_mirror(order, ActionKind::QueryNew) {
            return Ok(resolved);
        }
        self.gate(ActionKind::QueryNew, opts.priority).await?;
        let adapter = Arc::clone(&self.adapter);
        let pair = order.pair.clone();
        match order.id.clone() {
            Some(id) => {
                self.execute(order, ActionKind::QueryNew, opts.wait(), move || async move {
                    adapter.query(&pair, &id).await
                })
                .await
            }
            None => {
                let client_id = order.client_id.clone();
                self.execute(order, ActionKind::QueryNew, opts.wait(), move || async move {
                    adapter
                        .query_by_client_id(&pair, &client_id)
                        .await?
                        .into_iter()
                        .min_by(|a, b| id_ordering(a.id.as_deref(), b.id.as_deref()))
                        .ok_or_else(|| SyncError::OrderNotExist(client_id.clone()))
                })
                .await
            }
        }
    }

    /// Runs one action against `subject` to a single authoritative record.
    ///
    /// The correlation id is the subject's exchange id, or its client id
    /// while unacknowledged. The mirror is consulted first; otherwise
    /// `rest_call` runs on the worker pool while the mirror is watched.
    /// Callers are expected to have passed the ban and rate checks.
    ///
    /// A REST answer that does not resolve the action (a cancel still
    /// `Canceling`) is re-queried with backoff until REST or the mirror
    /// reports a final state. A REST call that loses the race keeps running
    /// and its answer is seeded into the mirror.
    ///
    /// # Errors
    ///
    /// Propagates REST errors, except that ambiguous placement failures go
    /// through reconciliation. `OrderNotExist` also evicts the order from the
    /// mirror.
    pub async fn execute<F, Fut>(
        &self,
        subject: &OrderRecord,
        action: ActionKind,
        wait: Wait,
        rest_call: F,
    ) -> SyncResult<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<OrderRecord>> + Send + 'static,
    {
        let correlation_id = subject.key().to_string();
        let mut updates = self.mirror.subscribe_updates();

        if let Some(resolved) = self.from_mirror(subject, action) {
            return Ok(resolved);
        }

        let mut rest = Some(self.spawn_rest(rest_call()));
        let deadline = match wait {
            Wait::UntilResolved => None,
            Wait::Bounded { timeout, .. } => Some(Instant::now() + timeout),
        };
        let mut best_known: Option<OrderRecord> = None;
        let mut recheck_at: Option<Instant> = None;
        let mut recheck_backoff = self.config.retry_backoff();

        loop {
            if let Some(record) = self.mirror.lookup_correlated(&correlation_id) {
                if action.is_resolved_by(&record) {
                    debug!(market = self.market(), id = %correlation_id, %action, "resolved by mirror");
                    self.detach_rest(rest.take());
                    return Ok(self.resolved(record, ResolvedBy::Mirror));
                }
                best_known = Some(record);
            }

            let rechecking = rest.is_none() && recheck_at.is_some();
            let event = tokio::select! {
                joined = join_rest(&mut rest) => Event::Rest(joined),
                _ = updates.changed() => Event::Wake,
                () = sleep(self.config.poll_interval()) => Event::Wake,
                () = sleep_until(recheck_at.unwrap_or_else(Instant::now)), if rechecking => Event::Recheck,
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Event::Deadline,
            };

            match event {
                Event::Wake => {}
                Event::Deadline => {
                    self.detach_rest(rest.take());
                    return self.on_deadline(&correlation_id, action, wait, best_known);
                }
                Event::Recheck => {
                    recheck_at = None;
                    let Some(known) = best_known.clone().filter(|r| r.id.is_some()) else {
                        continue;
                    };
                    match self.gate(ActionKind::QueryNew, RateCategory::Normal).await {
                        Ok(()) => {
                            debug!(market = self.market(), id = %correlation_id, %action, "re-querying non-final order");
                            rest = self.spawn_requery(&known);
                        }
                        Err(e) => {
                            warn!(market = self.market(), id = %correlation_id, error = %e, "re-query not sent");
                            recheck_at = Some(Instant::now() + recheck_backoff.next_delay());
                        }
                    }
                }
                Event::Rest(joined) => {
                    rest = None;
                    let outcome = joined
                        .map_err(|e| SyncError::TransientNetwork(format!("rest task aborted: {}", e)))
                        .and_then(|result| result);
                    match outcome {
                        Ok(record) => {
                            let record = self.seed_mirror(record);
                            if action.is_resolved_by(&record) || !self.mirror.is_ready() {
                                debug!(market = self.market(), id = %correlation_id, %action, "resolved by rest");
                                return Ok(self.resolved(record, ResolvedBy::Rest));
                            }
                            debug!(
                                market = self.market(),
                                id = %correlation_id,
                                %action,
                                status = ?record.status,
                                "rest answer not final, re-querying"
                            );
                            best_known = Some(record);
                            recheck_at = Some(Instant::now() + recheck_backoff.next_delay());
                        }
                        Err(SyncError::OrderNotExist(message)) => {
                            self.mirror.delete(&correlation_id);
                            return Err(SyncError::OrderNotExist(message));
                        }
                        Err(e) if action == ActionKind::New && e.is_ambiguous() => {
                            warn!(
                                market = self.market(),
                                client_id = %subject.client_id,
                                error = %e,
                                "placement outcome unknown, reconciling"
                            );
                            return self.reconcile_ambiguous(subject).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn from_mirror(&self, subject: &OrderRecord, action: ActionKind) -> Option<Resolved> {
        let record = self.mirror.lookup_correlated(subject.key())?;
        if !action.is_resolved_by(&record) {
            return None;
        }
        debug!(market = self.market(), id = subject.key(), %action, "answered from mirror");
        Some(self.resolved(record, ResolvedBy::Mirror))
    }

    fn on_deadline(
        &self,
        correlation_id: &str,
        action: ActionKind,
        wait: Wait,
        best_known: Option<OrderRecord>,
    ) -> SyncResult<Resolved> {
        let fail = matches!(
            wait,
            Wait::Bounded {
                fail_if_unresolved: true,
                ..
            }
        );
        match best_known {
            Some(record) if !fail => {
                debug!(market = self.market(), id = correlation_id, %action, "wait ran out, returning stale record");
                Ok(self.resolved(record, ResolvedBy::Stale))
            }
            _ => Err(SyncError::QueryUnresolved(format!(
                "{} {} on {}",
                action,
                correlation_id,
                self.market()
            ))),
        }
    }

    /// Finds out what an ambiguous placement did.
    async fn reconcile_ambiguous(&self, pending: &OrderRecord) -> SyncResult<Resolved> {
        let mut candidates = self.await_mirror_candidates(&pending.client_id).await;
        if candidates.is_empty() {
            candidates = self.query_candidates(pending).await?;
        }

        match candidates.len() {
            0 => {
                info!(
                    market = self.market(),
                    client_id = %pending.client_id,
                    "ambiguous placement did not reach the exchange"
                );
                let mut record = pending.clone().with_status(OrderStatus::Canceled);
                record.maker_size.get_or_insert(Decimal::ZERO);
                Ok(Resolved {
                    record,
                    resolved_by: ResolvedBy::Ambiguous,
                })
            }
            1 => {
                let record = candidates.remove(0);
                Ok(self.resolved(record, ResolvedBy::Ambiguous))
            }
            _ => self.resolve_duplicates(&pending.client_id, candidates).await,
        }
    }

    async fn await_mirror_candidates(&self, client_id: &str) -> Vec<OrderRecord> {
        if !self.mirror.is_ready() {
            return Vec::new();
        }
        let mut updates = self.mirror.subscribe_updates();
        let deadline = Instant::now() + self.config.ambiguous_wait();
        loop {
            let found = self.mirror.find_by_client_id(client_id);
            if !found.is_empty() {
                return found;
            }
            tokio::select! {
                _ = updates.changed() => {}
                () = sleep(self.config.poll_interval()) => {}
                () = sleep_until(deadline) => return Vec::new(),
            }
        }
    }

    async fn query_candidates(&self, pending: &OrderRecord) -> SyncResult<Vec<OrderRecord>> {
        let query = async {
            self.gate(ActionKind::QueryNew, RateCategory::Emergency).await?;
            self.adapter
                .query_by_client_id(&pending.pair, &pending.client_id)
                .await
        };
        match query.await {
            Ok(mut found) => {
                found.sort_by(|a, b| id_ordering(a.id.as_deref(), b.id.as_deref()));
                Ok(found.into_iter().map(|r| self.seed_mirror(r)).collect())
            }
            Err(e) => {
                error!(
                    market = self.market(),
                    client_id = %pending.client_id,
                    error = %e,
                    "cannot determine whether order was placed"
                );
                Err(SyncError::OrderMightBePlaced(format!(
                    "{} on {}: {}",
                    pending.client_id,
                    self.market(),
                    e
                )))
            }
        }
    }

    /// Keeps the earliest of several orders placed for one client id and
    /// cancels the rest. A duplicate that turns out filled wins; more than
    /// one filled order is not resolved automatically.
    async fn resolve_duplicates(
        &self,
        client_id: &str,
        candidates: Vec<OrderRecord>,
    ) -> SyncResult<Resolved> {
        warn!(
            market = self.market(),
            client_id,
            count = candidates.len(),
            "duplicate orders for one placement, canceling all but the earliest"
        );
        let mut candidates = candidates.into_iter();
        let Some(earliest) = candidates.next() else {
            return Err(SyncError::InvalidMarketState(format!(
                "no candidates for {}",
                client_id
            )));
        };

        let mut filled = Vec::new();
        if earliest.executed > Decimal::ZERO {
            filled.push(earliest.clone());
        }
        for duplicate in candidates {
            let latest = self.cancel_duplicate(duplicate).await;
            if latest.executed > Decimal::ZERO {
                filled.push(latest);
            }
        }

        // a later duplicate won, so the earliest has to go as well
        if filled.len() == 1 && filled[0].id != earliest.id {
            let latest = self.cancel_duplicate(earliest.clone()).await;
            if latest.executed > Decimal::ZERO {
                filled.push(latest);
            }
        }

        match filled.len() {
            0 => Ok(self.resolved(earliest, ResolvedBy::Ambiguous)),
            1 => {
                let winner = filled.remove(0);
                info!(
                    market = self.market(),
                    client_id,
                    id = winner.key(),
                    "filled duplicate taken as authoritative"
                );
                Ok(self.resolved(winner, ResolvedBy::Ambiguous))
            }
            n => {
                error!(market = self.market(), client_id, filled = n, "several duplicate orders filled");
                Err(SyncError::DataIntegrityViolation(format!(
                    "{} duplicate orders for {} on {} already filled",
                    n,
                    client_id,
                    self.market()
                )))
            }
        }
    }

    /// Cancels one duplicate with emergency priority and returns its latest
    /// known state.
    async fn cancel_duplicate(&self, duplicate: OrderRecord) -> OrderRecord {
        let Some(id) = duplicate.id.clone() else {
            return duplicate;
        };
        let outcome = match self.gate(ActionKind::Cancel, RateCategory::Emergency).await {
            Ok(()) => self.adapter.cancel(&duplicate.pair, &id).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(record) => self.seed_mirror(record),
            Err(e) => {
                warn!(market = self.market(), id = %id, error = %e, "duplicate cancel failed");
                duplicate
            }
        }
    }

    /// Waits for ban clearance and rate budget.
    async fn gate(&self, action: ActionKind, category: RateCategory) -> SyncResult<()> {
        self.bans.check(now_ms()).await?;

        let weight = self.adapter.weight(action);
        let opts = match action {
            ActionKind::QueryNew => AcquireOptions::weight_only(),
            ActionKind::New | ActionKind::Cancel => AcquireOptions::order(),
        };
        let deadline = Instant::now() + self.config.max_rate_wait();
        loop {
            if self
                .governor
                .try_acquire(self.market(), weight, category, opts)
                .await
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!(market = self.market(), %action, ?category, "rate budget exhausted");
                return Err(SyncError::RateLimited(format!(
                    "{} budget exhausted on {}",
                    action,
                    self.market()
                )));
            }
            sleep(self.config.rate_retry_interval()).await;
        }
    }

    async fn retry_transient<F, Fut>(
        &self,
        action: ActionKind,
        key: &str,
        mut attempt_once: F,
    ) -> SyncResult<Resolved>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<Resolved>>,
    {
        let mut backoff = self.config.retry_backoff();
        loop {
            match attempt_once().await {
                Err(e) if e.is_transient() && backoff.attempt() < self.config.max_transient_retries => {
                    let delay = backoff.next_delay();
                    warn!(
                        market = self.market(),
                        id = key,
                        %action,
                        attempt = backoff.attempt(),
                        error = %e,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn spawn_rest<Fut>(&self, call: Fut) -> RestHandle
    where
        Fut: Future<Output = SyncResult<OrderRecord>> + Send + 'static,
    {
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|e| SyncError::InvalidMarketState(format!("worker pool closed: {}", e)))?;
            call.await
        })
    }

    fn spawn_requery(&self, known: &OrderRecord) -> Option<RestHandle> {
        let id = known.id.clone()?;
        let adapter = Arc::clone(&self.adapter);
        let pair = known.pair.clone();
        Some(self.spawn_rest(async move { adapter.query(&pair, &id).await }))
    }

    /// Lets a REST call that lost the race finish in the background and
    /// seeds its answer into the mirror.
    fn detach_rest(&self, rest: Option<RestHandle>) {
        let Some(handle) = rest else {
            return;
        };
        let mirror = Arc::clone(&self.mirror);
        let marks = Arc::clone(&self.high_water);
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(record)) => {
                    let record = raise_to_high_water(&marks, record);
                    if let Some(id) = record.id.as_deref() {
                        mirror.write_if_absent(id, &record);
                    }
                }
                Ok(Err(e)) => debug!(market = mirror.market(), error = %e, "late rest call failed"),
                Err(e) => debug!(market = mirror.market(), error = %e, "late rest call aborted"),
            }
        });
    }

    /// Seeds the mirror with a REST-derived record without clobbering a
    /// broadcast value.
    fn seed_mirror(&self, record: OrderRecord) -> OrderRecord {
        let record = self.guard_executed(record);
        if let Some(id) = record.id.as_deref() {
            self.mirror.write_if_absent(id, &record);
        }
        record
    }

    fn resolved(&self, record: OrderRecord, resolved_by: ResolvedBy) -> Resolved {
        Resolved {
            record: self.guard_executed(record),
            resolved_by,
        }
    }

    fn guard_executed(&self, record: OrderRecord) -> OrderRecord {
        raise_to_high_water(&self.high_water, record)
    }
}

/// Keeps `executed` at the highest value ever observed for the order.
fn raise_to_high_water(
    marks: &Mutex<HashMap<String, Decimal>>,
    mut record: OrderRecord,
) -> OrderRecord {
    let mut marks = marks.lock().unwrap_or_else(PoisonError::into_inner);
    let mark = marks
        .entry(record.key().to_string())
        .or_insert(record.executed);
    if record.executed < *mark {
        warn!(
            market = %record.market,
            id = record.key(),
            seen = %mark,
            reported = %record.executed,
            "executed regressed, keeping highest value (exchange defect)"
        );
        record.set_executed(*mark);
    } else {
        *mark = record.executed;
    }
    record
}

async fn join_rest(rest: &mut Option<RestHandle>) -> Result<SyncResult<OrderRecord>, JoinError> {
    match rest {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

/// Applies `allow_fail`: non-fatal errors become `Ok(None)`.
fn settle(result: SyncResult<Resolved>, allow_fail: bool) -> SyncResult<Option<Resolved>> {
    match result {
        Ok(resolved) => Ok(Some(resolved)),
        Err(e) if allow_fail && !e.is_fatal() => {
            debug!(error = %e, "best-effort call failed");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
