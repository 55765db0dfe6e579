//! [J] AccountReconciler: periodic local-vs-exchange comparison, orphan
//! handling, and strategy freeze (`spec.md` §4.J).

use crate::audit::{AuditTrail, ReconciliationEvent, ReconciliationEventType, DEFAULT_AUDIT_CAPACITY};
use crate::mismatch::{classify, ManualInterventionItem, Mismatch, MismatchSeverity, OrderComparison, ReconciliationAction};
use crate::order_store::OrderStore;
use crate::report::ReconciliationReport;
use common::{CoreResult, ExecutionReport, SymbolId, Venue};
use dashmap::DashMap;
use exchange_adapters::ReconciliationQueryInterface;
use parking_lot::{Mutex, RwLock};
use positions::PositionAggregator;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked when a strategy crosses `max_mismatches_before_freeze`.
pub type FreezeCallback = dyn Fn(&str) + Send + Sync;

/// Tunables for one [`AccountReconciler`] instance.
pub struct ReconcilerConfig {
    pub reconciliation_interval: Duration,
    pub auto_cancel_orphaned: bool,
    pub freeze_on_mismatch: bool,
    pub max_mismatches_before_freeze: u32,
    pub audit_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval: Duration::from_secs(30),
            auto_cancel_orphaned: false,
            freeze_on_mismatch: true,
            max_mismatches_before_freeze: 3,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Periodic comparison of local order/position state against each venue's
/// authoritative state, with bounded remediation and strategy freezing.
///
/// Holds only [`ReconciliationQueryInterface`] handles to adapters, never
/// `Arc<dyn ExchangeAdapter>` — it cannot place an order (`spec.md` §3, §9).
pub struct AccountReconciler {
    adapters: DashMap<Venue, Arc<dyn ReconciliationQueryInterface>>,
    watched_symbols: DashMap<Venue, Vec<SymbolId>>,
    order_store: Arc<OrderStore>,
    positions: Arc<PositionAggregator>,
    config: RwLock<ReconcilerConfig>,
    audit: Mutex<AuditTrail>,
    consecutive_mismatches: DashMap<String, u32>,
    frozen_strategies: DashMap<String, bool>,
    freeze_callback: RwLock<Option<Arc<FreezeCallback>>>,
}

impl AccountReconciler {
    /// Create a reconciler with the given order store, position aggregator,
    /// and config.
    #[must_use]
    pub fn new(order_store: Arc<OrderStore>, positions: Arc<PositionAggregator>, config: ReconcilerConfig) -> Self {
        let audit_capacity = config.audit_capacity;
        Self {
            adapters: DashMap::new(),
            watched_symbols: DashMap::new(),
            order_store,
            positions,
            config: RwLock::new(config),
            audit: Mutex::new(AuditTrail::new(audit_capacity)),
            consecutive_mismatches: DashMap::new(),
            frozen_strategies: DashMap::new(),
            freeze_callback: RwLock::new(None),
        }
    }

    /// Grant the reconciler a query-only handle to `venue`'s adapter and the
    /// symbols it should watch there.
    pub fn register_venue(&self, venue: Venue, adapter: Arc<dyn ReconciliationQueryInterface>, symbols: Vec<SymbolId>) {
        self.adapters.insert(venue, adapter);
        self.watched_symbols.insert(venue, symbols);
    }

    /// Register a callback invoked with the strategy id when it is frozen.
    pub fn set_freeze_callback(&self, callback: Arc<FreezeCallback>) {
        *self.freeze_callback.write() = Some(callback);
    }

    /// Register a new order the core just placed, before any fills arrive.
    /// Callers place orders through `coordinator::ExchangeCoordinator`, which
    /// has no knowledge of the reconciler, so this must be called explicitly
    /// alongside `place_order` with the same `venue`/`client_order_id` and
    /// the originating `PlaceOrderRequest::strategy_id`.
    pub fn track_new_order(&self, venue: Venue, symbol: SymbolId, client_order_id: String, strategy_id: String) {
        self.order_store.track_new_order(venue, symbol, client_order_id, strategy_id);
    }

    /// A callback compatible with `ExchangeCoordinator::subscribe_executions`
    /// that folds every streamed report into this reconciler's local order
    /// view (`spec.md` §4.J).
    #[must_use]
    pub fn execution_callback(self: &Arc<Self>) -> Arc<dyn Fn(Venue, &ExecutionReport) + Send + Sync> {
        let this = Arc::clone(self);
        Arc::new(move |venue: Venue, report: &ExecutionReport| {
            this.order_store.apply_report(venue, report);
        })
    }

    /// Whether `strategy_id` is currently frozen.
    #[must_use]
    pub fn is_strategy_frozen(&self, strategy_id: &str) -> bool {
        self.frozen_strategies.get(strategy_id).is_some_and(|v| *v)
    }

    /// Clear a strategy's frozen flag and its consecutive-mismatch counter.
    pub fn resume_strategy(&self, strategy_id: &str) {
        self.frozen_strategies.insert(strategy_id.to_string(), false);
        self.consecutive_mismatches.insert(strategy_id.to_string(), 0);
        self.audit.lock().push(ReconciliationEvent {
            event_type: ReconciliationEventType::StrategyResumed,
            ts_ns: 0,
            message: format!("strategy {strategy_id} resumed"),
            severity: MismatchSeverity::Warning,
            mismatch: None,
        });
    }

    /// Run one reconciliation cycle across every registered venue.
    pub async fn reconcile_now(&self, now_ns: u64) -> Vec<ReconciliationReport> {
        let venues: Vec<Venue> = self.adapters.iter().map(|e| *e.key()).collect();
        let mut reports = Vec::with_capacity(venues.len());
        for venue in venues {
            reports.push(self.reconcile_venue(venue, now_ns).await);
        }
        reports
    }

    async fn reconcile_venue(&self, venue: Venue, now_ns: u64) -> ReconciliationReport {
        let Some(adapter) = self.adapters.get(&venue).map(|e| e.clone()) else {
            return ReconciliationReport {
                venue,
                ts_ns: now_ns,
                orders_checked: 0,
                orders_matched: 0,
                mismatches: vec![],
                orphans_found: 0,
                orphans_cancelled: 0,
                position_discrepancies: vec![],
                manual_interventions: vec![],
                max_severity: None,
            };
        };
        let symbols = self.watched_symbols.get(&venue).map(|e| e.clone()).unwrap_or_default();

        let mut mismatches = Vec::new();
        let mut manual_interventions = Vec::new();
        let mut position_discrepancies = Vec::new();
        let mut orders_checked: u64 = 0;
        let mut orders_matched: u64 = 0;
        let mut orphans_found: u64 = 0;
        let mut orphans_cancelled: u64 = 0;
        let auto_cancel = self.config.read().auto_cancel_orphaned;

        for symbol in &symbols {
            let exchange_orders = match adapter.query_open_orders_async(symbol).await {
                Ok(orders) => orders,
                Err(_) => continue,
            };
            let local_orders = self.order_store.open_orders_for_venue(venue);

            for report in &exchange_orders {
                orders_checked += 1;
                let local_record = self.order_store.get(venue, &report.client_order_id);
                let local = local_record.as_ref().map(|r| (r.status, r.filled_qty, r.avg_price));
                let cmp = OrderComparison {
                    venue,
                    symbol: symbol.clone(),
                    client_order_id: report.client_order_id.clone(),
                    local,
                    exchange: Some((report.status, report.last_fill_qty, report.last_fill_price)),
                };
                match classify(&cmp, auto_cancel) {
                    Some(mismatch) => {
                        if local.is_none() {
                            orphans_found += 1;
                        }
                        self.apply_mismatch(&mismatch, &adapter, now_ns, &mut orphans_cancelled, &mut manual_interventions).await;
                        let strategy_id = local_record.map(|r| r.strategy_id).filter(|s| !s.is_empty());
                        if let Some(strategy_id) = strategy_id {
                            self.record_strategy_mismatch(&strategy_id, now_ns);
                        }
                        mismatches.push(mismatch);
                    }
                    None => orders_matched += 1,
                }
            }

            for (client_order_id, local_record) in &local_orders {
                if local_record.symbol != *symbol {
                    continue;
                }
                if exchange_orders.iter().any(|r| &r.client_order_id == client_order_id) {
                    continue;
                }
                if local_record.status.is_terminal() {
                    continue;
                }
                // Local thinks it's still open but the exchange's open-orders
                // snapshot no longer lists it: treat as a status-lag warning.
                let cmp = OrderComparison {
                    venue,
                    symbol: symbol.clone(),
                    client_order_id: client_order_id.clone(),
                    local: Some((local_record.status, local_record.filled_qty, local_record.avg_price)),
                    exchange: None,
                };
                if classify(&cmp, auto_cancel).is_none() {
                    orders_matched += 1;
                }
            }
        }

        let report = ReconciliationReport {
            venue,
            ts_ns: now_ns,
            orders_checked,
            orders_matched,
            mismatches,
            orphans_found,
            orphans_cancelled,
            position_discrepancies: std::mem::take(&mut position_discrepancies),
            manual_interventions,
            max_severity: None,
        }
        .with_derived_severity();

        self.audit.lock().push(ReconciliationEvent {
            event_type: ReconciliationEventType::CycleCompleted,
            ts_ns: now_ns,
            message: report.generate_report_summary(),
            severity: report.max_severity.unwrap_or(MismatchSeverity::Warning),
            mismatch: None,
        });

        report
    }

    async fn apply_mismatch(
        &self,
        mismatch: &Mismatch,
        adapter: &Arc<dyn ReconciliationQueryInterface>,
        now_ns: u64,
        orphans_cancelled: &mut u64,
        manual_interventions: &mut Vec<ManualInterventionItem>,
    ) {
        {
            let mut audit = self.audit.lock();
            audit.mismatches_found += 1;
            audit.push(ReconciliationEvent {
                event_type: ReconciliationEventType::MismatchDetected,
                ts_ns: now_ns,
                message: mismatch.description.clone(),
                severity: mismatch.severity,
                mismatch: Some(mismatch.clone()),
            });
        }

        match &mismatch.action {
            ReconciliationAction::UpdateLocalState { status, filled_qty, avg_price } => {
                tracing::debug!(venue = %mismatch.venue, client_order_id = %mismatch.client_order_id, ?status, filled_qty, avg_price, "adopting exchange state");
                let mut audit = self.audit.lock();
                audit.local_updates_applied += 1;
                audit.push(ReconciliationEvent {
                    event_type: ReconciliationEventType::LocalStateUpdated,
                    ts_ns: now_ns,
                    message: format!("{} updated to status={status:?} filled_qty={filled_qty}", mismatch.client_order_id),
                    severity: MismatchSeverity::Warning,
                    mismatch: None,
                });
            }
            ReconciliationAction::CancelOrphanedOrder => {
                self.audit.lock().orphans_found += 1;
                match adapter.cancel_order_async(&mismatch.symbol, &mismatch.client_order_id).await {
                    Ok(_) => {
                        *orphans_cancelled += 1;
                        let mut audit = self.audit.lock();
                        audit.orphans_cancelled += 1;
                        audit.push(ReconciliationEvent {
                            event_type: ReconciliationEventType::OrderCancelled,
                            ts_ns: now_ns,
                            message: format!("cancelled orphaned order {}", mismatch.client_order_id),
                            severity: MismatchSeverity::Error,
                            mismatch: None,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(venue = %mismatch.venue, client_order_id = %mismatch.client_order_id, %err, "failed to cancel orphaned order");
                        manual_interventions.push(ManualInterventionItem {
                            venue: mismatch.venue,
                            client_order_id: mismatch.client_order_id.clone(),
                            severity: MismatchSeverity::Critical,
                            description: format!("orphan cancel failed: {err}"),
                        });
                    }
                }
            }
            ReconciliationAction::FreezeStrategy { strategy_id } => {
                self.freeze(strategy_id, now_ns);
            }
            ReconciliationAction::ManualIntervention => {
                manual_interventions.push(ManualInterventionItem {
                    venue: mismatch.venue,
                    client_order_id: mismatch.client_order_id.clone(),
                    severity: mismatch.severity,
                    description: mismatch.description.clone(),
                });
            }
        }
    }

    /// Bump `strategy_id`'s consecutive-mismatch counter and freeze it once
    /// `max_mismatches_before_freeze` is reached (`spec.md` §4.J
    /// FreezeStrategy).
    fn record_strategy_mismatch(&self, strategy_id: &str, now_ns: u64) {
        let config = self.config.read();
        if !config.freeze_on_mismatch || self.is_strategy_frozen(strategy_id) {
            return;
        }
        let mut count = self.consecutive_mismatches.entry(strategy_id.to_string()).or_insert(0);
        *count += 1;
        let threshold = config.max_mismatches_before_freeze;
        let hit_threshold = *count >= threshold;
        drop(count);
        if hit_threshold {
            self.freeze(strategy_id, now_ns);
        }
    }

    fn freeze(&self, strategy_id: &str, now_ns: u64) {
        self.frozen_strategies.insert(strategy_id.to_string(), true);
        self.audit.lock().strategy_freezes += 1;
        self.audit.lock().push(ReconciliationEvent {
            event_type: ReconciliationEventType::StrategyFrozen,
            ts_ns: now_ns,
            message: format!("strategy {strategy_id} frozen after repeated mismatches"),
            severity: MismatchSeverity::Critical,
            mismatch: None,
        });
        if let Some(cb) = self.freeze_callback.read().as_ref() {
            cb(strategy_id);
        }
    }

    /// Reconcile `venue`/`symbol` position quantity against `exchange_qty`
    /// via the position aggregator, recording any discrepancy.
    #[must_use]
    pub fn reconcile_position(&self, venue: Venue, symbol: &SymbolId, exchange_qty: f64, now_ns: u64) -> Option<positions::PositionDiscrepancy> {
        self.positions.reconcile_position(venue, symbol, exchange_qty, now_ns)
    }

    /// Spawn the background reconciliation loop on the current tokio runtime.
    /// Returns a handle whose `abort()` stops the loop; in-flight venue
    /// queries complete and their results are discarded.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = this.config.read().reconciliation_interval;
                tokio::time::sleep(interval).await;
                let now_ns = common::now_ns();
                let _ = this.reconcile_now(now_ns).await;
            }
        })
    }

    /// Read-only snapshot of current audit stats.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        let audit = self.audit.lock();
        ReconcilerStats {
            orders_checked: audit.orders_checked,
            orders_matched: audit.orders_matched,
            mismatches_found: audit.mismatches_found,
            orphans_found: audit.orphans_found,
            orphans_cancelled: audit.orphans_cancelled,
            local_updates_applied: audit.local_updates_applied,
            strategy_freezes: audit.strategy_freezes,
            audit_event_count: audit.events().len(),
        }
    }
}

/// Cumulative reconciler stat counters (`spec.md` §4.J "Stats counters are
/// monotonically increasing").
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerStats {
    pub orders_checked: u64,
    pub orders_matched: u64,
    pub mismatches_found: u64,
    pub orphans_found: u64,
    pub orphans_cancelled: u64,
    pub local_updates_applied: u64,
    pub strategy_freezes: u64,
    pub audit_event_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{ExecutionReport, OrderStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAdapter {
        open_orders: Vec<ExecutionReport>,
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl ReconciliationQueryInterface for FakeAdapter {
        async fn query_open_orders_async(&self, _symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
            Ok(self.open_orders.clone())
        }

        async fn query_order_async(&self, _symbol: &SymbolId, client_order_id: &str) -> CoreResult<ExecutionReport> {
            self.open_orders
                .iter()
                .find(|o| o.client_order_id == client_order_id)
                .cloned()
                .ok_or(common::CoreError::Validation { reason: "not found".into() })
        }

        async fn query_orders_async(&self, _symbol: &SymbolId, _start_ms: u64, _end_ms: u64) -> CoreResult<Vec<ExecutionReport>> {
            Ok(self.open_orders.clone())
        }

        async fn cancel_order_async(&self, _symbol: &SymbolId, venue_order_id: &str) -> CoreResult<ExecutionReport> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionReport {
                symbol: SymbolId::new("BTCUSDT"),
                client_order_id: venue_order_id.to_string(),
                venue_order_id: Some(venue_order_id.to_string()),
                status: OrderStatus::Canceled,
                last_fill_qty: 0.0,
                last_fill_price: 0.0,
                ts_exchange_ns: 0,
                ts_recv_ns: 0,
                reason: None,
            })
        }
    }

    fn orphan_report(client_order_id: &str) -> ExecutionReport {
        ExecutionReport {
            symbol: SymbolId::new("BTCUSDT"),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some("v1".into()),
            status: OrderStatus::Accepted,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: 0,
            ts_recv_ns: 0,
            reason: None,
        }
    }

    #[tokio::test]
    async fn s4_orphan_order_is_detected_and_cancelled() {
        let store = Arc::new(OrderStore::new());
        let positions = Arc::new(PositionAggregator::new());
        let config = ReconcilerConfig { auto_cancel_orphaned: true, ..Default::default() };
        let reconciler = AccountReconciler::new(store, positions, config);
        let adapter = Arc::new(FakeAdapter { open_orders: vec![orphan_report("orphan-1")], cancels: AtomicUsize::new(0) });
        reconciler.register_venue(Venue::Binance, adapter.clone(), vec![SymbolId::new("BTCUSDT")]);

        let reports = reconciler.reconcile_now(0).await;
        assert_eq!(reports.len(), 1);
        let stats = reconciler.stats();
        assert_eq!(stats.orphans_found, 1);
        assert_eq!(stats.orphans_cancelled, 1);
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn matching_local_and_exchange_orders_produce_no_mismatch() {
        let store = Arc::new(OrderStore::new());
        store.apply_report(
            Venue::Binance,
            &ExecutionReport {
                symbol: SymbolId::new("BTCUSDT"),
                client_order_id: "c1".into(),
                venue_order_id: Some("v1".into()),
                status: OrderStatus::Filled,
                last_fill_qty: 1.0,
                last_fill_price: 100.0,
                ts_exchange_ns: 0,
                ts_recv_ns: 0,
                reason: None,
            },
        );
        let positions = Arc::new(PositionAggregator::new());
        let reconciler = AccountReconciler::new(store, positions, ReconcilerConfig::default());
        let matching = ExecutionReport {
            symbol: SymbolId::new("BTCUSDT"),
            client_order_id: "c1".into(),
            venue_order_id: Some("v1".into()),
            status: OrderStatus::Filled,
            last_fill_qty: 1.0,
            last_fill_price: 100.0,
            ts_exchange_ns: 0,
            ts_recv_ns: 0,
            reason: None,
        };
        let adapter = Arc::new(FakeAdapter { open_orders: vec![matching], cancels: AtomicUsize::new(0) });
        reconciler.register_venue(Venue::Binance, adapter, vec![SymbolId::new("BTCUSDT")]);

        let reports = reconciler.reconcile_now(0).await;
        assert_eq!(reports[0].mismatches.len(), 0);
        assert_eq!(reports[0].orders_matched, 1);
    }

    #[test]
    fn resume_strategy_clears_frozen_flag() {
        let store = Arc::new(OrderStore::new());
        let positions = Arc::new(PositionAggregator::new());
        let reconciler = AccountReconciler::new(store, positions, ReconcilerConfig::default());
        reconciler.freeze("STRAT-1", 0);
        assert!(reconciler.is_strategy_frozen("STRAT-1"));
        reconciler.resume_strategy("STRAT-1");
        assert!(!reconciler.is_strategy_frozen("STRAT-1"));
    }
}
