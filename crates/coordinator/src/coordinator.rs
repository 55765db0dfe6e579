//! The `ExchangeCoordinator` façade (`spec.md` §4.F).

use crate::routing::{RoutingConfig, RoutingDecision, RoutingStrategy};
use common::{
    CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderSide, OrderStatus,
    PlaceOrderRequest, SymbolId, Venue,
};
use dashmap::DashMap;
use exchange_adapters::{ExchangeAdapter, Level};
use market_data::AggregatedOrderBook;
use parking_lot::RwLock;
use positions::PositionAggregator;
use market_data::LatencyTracker;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Invoked for every successful place/cancel response, with the venue that
/// produced it (a report alone doesn't carry its venue).
type ExecutionCallback = dyn Fn(Venue, &ExecutionReport) + Send + Sync;

/// Connectivity/health summary for one registered venue.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeStatus {
    /// Whether the adapter is currently connected.
    pub connected: bool,
    /// Whether the venue passes the Coordinator's latency health check.
    pub healthy: bool,
}

/// A position rolled up across every venue holding `symbol`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSummary {
    /// Net signed quantity across venues.
    pub quantity: f64,
    /// Quantity-weighted average entry price across venues (0 when flat).
    pub avg_entry_price: f64,
    /// Sum of realized PnL across venues.
    pub realized_pnl: f64,
    /// Sum of unrealized PnL across venues.
    pub unrealized_pnl: f64,
}

/// Owns adapters, per-symbol aggregated books, a latency tracker, and the
/// position aggregator; the single entry point strategies route orders
/// through (`spec.md` §4.F, §6).
pub struct ExchangeCoordinator {
    adapters: DashMap<Venue, Arc<dyn ExchangeAdapter>>,
    registration_order: RwLock<Vec<Venue>>,
    books: DashMap<SymbolId, Arc<AggregatedOrderBook>>,
    latency: Arc<LatencyTracker>,
    positions: Arc<PositionAggregator>,
    routing_config: RwLock<RoutingConfig>,
    default_venue: RwLock<Option<Venue>>,
    venue_weights: DashMap<Venue, f64>,
    round_robin_idx: AtomicUsize,
    execution_callback: RwLock<Option<Arc<ExecutionCallback>>>,
    order_status: DashMap<String, OrderStatus>,
    /// `(venue, side)` recorded at `place_order` time so `emit` can apply
    /// fills to `positions` without `ExecutionReport` carrying a side.
    order_meta: DashMap<String, (Venue, OrderSide)>,
    book_warning_age: Duration,
    book_max_age: Duration,
    health_max_latency: Duration,
    health_max_staleness: Duration,
}

impl ExchangeCoordinator {
    /// Build an empty coordinator. `latency` and `positions` are shared with
    /// other components (e.g. the reconciler) that need the same view.
    #[must_use]
    pub fn new(
        latency: Arc<LatencyTracker>,
        positions: Arc<PositionAggregator>,
        book_warning_age: Duration,
        book_max_age: Duration,
    ) -> Self {
        Self {
            adapters: DashMap::new(),
            registration_order: RwLock::new(Vec::new()),
            books: DashMap::new(),
            latency,
            positions,
            routing_config: RwLock::new(RoutingConfig::default()),
            default_venue: RwLock::new(None),
            venue_weights: DashMap::new(),
            round_robin_idx: AtomicUsize::new(0),
            execution_callback: RwLock::new(None),
            order_status: DashMap::new(),
            order_meta: DashMap::new(),
            book_warning_age,
            book_max_age,
            health_max_latency: Duration::from_millis(500),
            health_max_staleness: Duration::from_secs(60),
        }
    }

    /// Register an adapter under `venue`. Re-registering the same venue
    /// replaces the adapter without disturbing registration order.
    pub fn register_adapter(&self, venue: Venue, adapter: Arc<dyn ExchangeAdapter>) {
        let mut order = self.registration_order.write();
        if !order.contains(&venue) {
            order.push(venue);
        }
        self.adapters.insert(venue, adapter);
    }

    /// Unregister `venue`: drop its adapter and remove it from every
    /// aggregated book.
    pub fn unregister_adapter(&self, venue: Venue) {
        self.adapters.remove(&venue);
        self.registration_order.write().retain(|v| *v != venue);
        for book in self.books.iter() {
            book.value().remove_venue(venue);
        }
    }

    /// Fetch or lazily create the aggregated book for `symbol`.
    #[must_use]
    pub fn get_or_create_book(&self, symbol: &SymbolId) -> Arc<AggregatedOrderBook> {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| {
                Arc::new(AggregatedOrderBook::new(
                    symbol.clone(),
                    self.book_warning_age,
                    self.book_max_age,
                ))
            })
            .clone()
    }

    /// Aggregated best bid/ask for `symbol`, if the book exists.
    #[must_use]
    pub fn get_aggregated_bbo(&self, symbol: &SymbolId) -> market_data::AggregatedBbo {
        self.get_or_create_book(symbol).get_aggregated_bbo()
    }

    /// Record one round-trip latency sample for `venue`.
    pub fn record_latency(&self, venue: Venue, latency: Duration, ts_ns: u64) {
        self.latency.record_latency(venue, latency, ts_ns);
    }

    /// Set the default venue used when routing has no eligible candidate.
    pub fn set_default_venue(&self, venue: Venue) {
        *self.default_venue.write() = Some(venue);
    }

    /// Change the active routing strategy.
    pub fn set_routing_strategy(&self, strategy: RoutingStrategy) {
        self.routing_config.write().strategy = strategy;
    }

    /// Set the weight used by `RoutingStrategy::WeightedRandom` for `venue`.
    pub fn set_venue_weight(&self, venue: Venue, weight: f64) {
        self.venue_weights.insert(venue, weight.max(0.0));
    }

    /// Register a sink invoked for every successful place/cancel response.
    pub fn subscribe_executions(&self, callback: Arc<ExecutionCallback>) {
        *self.execution_callback.write() = Some(callback);
    }

    /// Last status the Coordinator accepted for `client_order_id`.
    #[must_use]
    pub fn get_order_status(&self, client_order_id: &str) -> Option<OrderStatus> {
        self.order_status.get(client_order_id).map(|s| *s)
    }

    /// Net position for `symbol`, rolled up across every venue.
    #[must_use]
    pub fn get_position(&self, symbol: &SymbolId) -> PositionSummary {
        let per_venue = self.positions.get_positions_for_symbol(symbol);
        let mut summary = PositionSummary::default();
        let mut weighted_price_sum = 0.0;
        let mut abs_qty_sum = 0.0;
        for (_, state) in per_venue {
            summary.quantity += state.quantity;
            summary.realized_pnl += state.realized_pnl;
            summary.unrealized_pnl += state.unrealized_pnl;
            weighted_price_sum += state.quantity.abs() * state.avg_entry_price;
            abs_qty_sum += state.quantity.abs();
        }
        summary.avg_entry_price = if abs_qty_sum > 0.0 { weighted_price_sum / abs_qty_sum } else { 0.0 };
        summary
    }

    /// Connectivity/health summary for `venue`.
    #[must_use]
    pub fn get_exchange_status(&self, venue: Venue, now_ns: u64) -> Option<ExchangeStatus> {
        let adapter = self.adapters.get(&venue)?;
        Some(ExchangeStatus {
            connected: adapter.is_connected(),
            healthy: self
                .latency
                .is_healthy(venue, now_ns, self.health_max_latency, self.health_max_staleness),
        })
    }

    /// Sum of realized + unrealized PnL across every tracked position.
    #[must_use]
    pub fn get_total_pnl(&self) -> f64 {
        self.positions.get_total_pnl()
    }

    /// Every currently-registered venue, in registration order. Used by
    /// higher-level routers (e.g. the smart order router) that need their
    /// own eligibility sweep over the same venue set.
    #[must_use]
    pub fn registered_venues(&self) -> Vec<Venue> {
        self.registration_order.read().clone()
    }

    /// Whether `venue` currently has a registered adapter.
    #[must_use]
    pub fn is_registered(&self, venue: Venue) -> bool {
        self.adapters.contains_key(&venue)
    }

    /// Latency statistics for `venue`, delegating to the shared tracker.
    #[must_use]
    pub fn latency_stats(&self, venue: Venue, now_ns: u64) -> Option<market_data::LatencyStats> {
        self.latency.get_stats(venue, now_ns)
    }

    fn side_price(bid: Level, ask: Level, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => ask.price,
            OrderSide::Sell => bid.price,
        }
    }

    /// Decide which registered venue should receive an order for `symbol`
    /// on `side`, per the active [`RoutingStrategy`] (`spec.md` §4.F).
    pub fn route_order(&self, symbol: &SymbolId, side: OrderSide, now_ns: u64) -> CoreResult<RoutingDecision> {
        let book = self.get_or_create_book(symbol);
        let registration_order = self.registration_order.read().clone();
        let stale: std::collections::HashSet<Venue> = book
            .get_venues()
            .into_iter()
            .filter(|v| v.is_stale)
            .map(|v| v.venue)
            .collect();

        let quoted: Vec<(Venue, Level, Level)> = registration_order
            .iter()
            .filter(|v| self.adapters.contains_key(v) && !stale.contains(v))
            .filter_map(|v| book.get_venue_bbo(*v).map(|(bid, ask)| (*v, bid, ask)))
            .collect();

        let strategy = self.routing_config.read().strategy;

        match strategy {
            RoutingStrategy::BestPrice => self.pick_best_price(&quoted, &registration_order, side, now_ns),
            RoutingStrategy::LowestLatency => self.pick_lowest_latency(&quoted, &registration_order, side, now_ns),
            RoutingStrategy::Balanced => self.pick_balanced(&quoted, &registration_order, side, now_ns),
            RoutingStrategy::RoundRobin => self.pick_round_robin(&quoted, side),
            RoutingStrategy::WeightedRandom => self.pick_weighted_random(&registration_order, &quoted, side),
        }
        .or_else(|| self.fallback_to_default(side, &quoted))
        .ok_or_else(|| CoreError::Validation {
            reason: "no eligible venue for routing".to_string(),
        })
    }

    fn fallback_to_default(&self, side: OrderSide, quoted: &[(Venue, Level, Level)]) -> Option<RoutingDecision> {
        let default_venue = (*self.default_venue.read())?;
        let (_, bid, ask) = quoted.iter().find(|(v, _, _)| *v == default_venue)?;
        Some(RoutingDecision {
            selected_venue: default_venue,
            expected_price: Self::side_price(*bid, *ask, side),
            observed_prices: quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect(),
        })
    }

    fn pick_best_price(
        &self,
        quoted: &[(Venue, Level, Level)],
        registration_order: &[Venue],
        side: OrderSide,
        now_ns: u64,
    ) -> Option<RoutingDecision> {
        if quoted.is_empty() {
            return None;
        }
        let observed: Vec<(Venue, f64)> = quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect();
        let best_price = match side {
            OrderSide::Buy => observed.iter().map(|(_, p)| *p).fold(f64::INFINITY, f64::min),
            OrderSide::Sell => observed.iter().map(|(_, p)| *p).fold(f64::NEG_INFINITY, f64::max),
        };
        let mut candidates: Vec<Venue> = observed
            .iter()
            .filter(|(_, p)| (*p - best_price).abs() < f64::EPSILON)
            .map(|(v, _)| *v)
            .collect();
        candidates.sort_by_key(|v| {
            let p50 = self.latency.get_stats(*v, now_ns).map(|s| s.p50).unwrap_or(Duration::MAX);
            let reg_idx = registration_order.iter().position(|r| r == v).unwrap_or(usize::MAX);
            (p50, reg_idx)
        });
        let selected = *candidates.first()?;
        Some(RoutingDecision {
            selected_venue: selected,
            expected_price: best_price,
            observed_prices: observed,
        })
    }

    fn pick_lowest_latency(
        &self,
        quoted: &[(Venue, Level, Level)],
        registration_order: &[Venue],
        side: OrderSide,
        now_ns: u64,
    ) -> Option<RoutingDecision> {
        if quoted.is_empty() {
            return None;
        }
        let mut candidates: Vec<Venue> = quoted.iter().map(|(v, _, _)| *v).collect();
        candidates.sort_by_key(|v| {
            let p50 = self.latency.get_stats(*v, now_ns).map(|s| s.p50).unwrap_or(Duration::MAX);
            let reg_idx = registration_order.iter().position(|r| r == v).unwrap_or(usize::MAX);
            (p50, reg_idx)
        });
        let selected = *candidates.first()?;
        let (_, bid, ask) = quoted.iter().find(|(v, _, _)| *v == selected)?;
        Some(RoutingDecision {
            selected_venue: selected,
            expected_price: Self::side_price(*bid, *ask, side),
            observed_prices: quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect(),
        })
    }

    fn pick_balanced(
        &self,
        quoted: &[(Venue, Level, Level)],
        registration_order: &[Venue],
        side: OrderSide,
        now_ns: u64,
    ) -> Option<RoutingDecision> {
        if quoted.is_empty() {
            return None;
        }
        let latency_weight = self.routing_config.read().latency_weight;
        let prices: Vec<(Venue, f64)> = quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect();
        let min_price = prices.iter().map(|(_, p)| *p).fold(f64::INFINITY, f64::min);
        let max_price = prices.iter().map(|(_, p)| *p).fold(f64::NEG_INFINITY, f64::max);
        let price_range = (max_price - min_price).max(f64::EPSILON);

        let p50s: Vec<(Venue, Duration)> = quoted
            .iter()
            .map(|(v, _, _)| (*v, self.latency.get_stats(*v, now_ns).map(|s| s.p50).unwrap_or(Duration::MAX)))
            .collect();
        let max_p50 = p50s
            .iter()
            .map(|(_, d)| *d)
            .filter(|d| *d != Duration::MAX)
            .max()
            .unwrap_or(Duration::from_millis(1))
            .as_secs_f64()
            .max(f64::EPSILON);

        let mut best: Option<(Venue, f64)> = None;
        for (venue, price) in &prices {
            // Buy wants low price scored high; Sell wants high price scored high.
            let price_score = match side {
                OrderSide::Buy => 1.0 - (price - min_price) / price_range,
                OrderSide::Sell => (price - min_price) / price_range,
            };
            let p50 = p50s.iter().find(|(v, _)| v == venue).map(|(_, d)| *d).unwrap_or(Duration::MAX);
            let latency_score = if p50 == Duration::MAX {
                0.0
            } else {
                1.0 - (p50.as_secs_f64() / max_p50)
            };
            let score = (1.0 - latency_weight) * price_score + latency_weight * latency_score;
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((*venue, score)),
            }
        }
        let (selected, _) = best?;
        let (_, bid, ask) = quoted.iter().find(|(v, _, _)| *v == selected)?;
        let _ = registration_order;
        Some(RoutingDecision {
            selected_venue: selected,
            expected_price: Self::side_price(*bid, *ask, side),
            observed_prices: prices,
        })
    }

    fn pick_round_robin(&self, quoted: &[(Venue, Level, Level)], side: OrderSide) -> Option<RoutingDecision> {
        let registered: Vec<Venue> = self.registration_order.read().clone();
        if registered.is_empty() {
            return None;
        }
        let idx = self.round_robin_idx.fetch_add(1, Ordering::Relaxed) % registered.len();
        let selected = registered[idx];
        let price = quoted
            .iter()
            .find(|(v, _, _)| *v == selected)
            .map(|(_, b, a)| Self::side_price(*b, *a, side))
            .unwrap_or(0.0);
        Some(RoutingDecision {
            selected_venue: selected,
            expected_price: price,
            observed_prices: quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect(),
        })
    }

    fn pick_weighted_random(
        &self,
        registration_order: &[Venue],
        quoted: &[(Venue, Level, Level)],
        side: OrderSide,
    ) -> Option<RoutingDecision> {
        if registration_order.is_empty() {
            return None;
        }
        let weights: Vec<(Venue, f64)> = registration_order
            .iter()
            .map(|v| (*v, self.venue_weights.get(v).map(|w| *w).unwrap_or(1.0)))
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }
        let mut sample = rand::thread_rng().gen_range(0.0..total);
        let mut selected = weights[0].0;
        for (venue, weight) in &weights {
            if sample < *weight {
                selected = *venue;
                break;
            }
            sample -= weight;
        }
        let price = quoted
            .iter()
            .find(|(v, _, _)| *v == selected)
            .map(|(_, b, a)| Self::side_price(*b, *a, side))
            .unwrap_or(0.0);
        Some(RoutingDecision {
            selected_venue: selected,
            expected_price: price,
            observed_prices: quoted.iter().map(|(v, b, a)| (*v, Self::side_price(*b, *a, side))).collect(),
        })
    }

    /// Apply `report` to the Coordinator's tracked per-order status,
    /// enforcing the monotonic state machine invariant (`spec.md` §4.F,
    /// §8 invariant 1). Returns `true` if it advanced the tracked status.
    fn observe_report(&self, report: &ExecutionReport) -> bool {
        let mut entry = self.order_status.entry(report.client_order_id.clone()).or_insert(report.status);
        if *entry == report.status {
            return true;
        }
        if report.status.can_follow(*entry) {
            *entry = report.status;
            true
        } else {
            tracing::warn!(
                client_order_id = %report.client_order_id,
                from = ?*entry,
                to = ?report.status,
                "dropping out-of-order execution report"
            );
            false
        }
    }

    fn emit(&self, venue: Venue, report: &ExecutionReport) {
        self.observe_report(report);
        if report.last_fill_qty > common::QTY_EPS {
            let side = self
                .order_meta
                .get(&report.client_order_id)
                .map(|m| m.1)
                .unwrap_or(OrderSide::Buy);
            self.positions.on_fill(venue, &report.symbol, side, report.last_fill_qty, report.last_fill_price);
        }
        if report.status.is_terminal() {
            self.order_meta.remove(&report.client_order_id);
        }
        if let Some(cb) = self.execution_callback.read().as_ref() {
            cb(venue, report);
        }
    }

    /// Place an order, routing through the configured strategy when `venue`
    /// is `None`.
    pub async fn place_order(&self, req: &PlaceOrderRequest, venue: Option<Venue>, now_ns: u64) -> CoreResult<ExecutionReport> {
        req.validate()?;
        let target = match venue {
            Some(v) => v,
            None => self.route_order(&req.symbol, req.side, now_ns)?.selected_venue,
        };
        let adapter = self
            .adapters
            .get(&target)
            .ok_or_else(|| CoreError::Validation {
                reason: format!("venue {target} not registered"),
            })?
            .clone();
        self.order_meta.insert(req.client_order_id.clone(), (target, req.side));
        let started = Instant::now();
        let result = adapter.place_order(req).await;
        self.record_latency(target, started.elapsed(), now_ns);
        let report = result?;
        self.emit(target, &report);
        Ok(report)
    }

    /// Cancel an order on `venue`.
    pub async fn cancel_order(&self, venue: Venue, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        let adapter = self
            .adapters
            .get(&venue)
            .ok_or_else(|| CoreError::Validation {
                reason: format!("venue {venue} not registered"),
            })?
            .clone();
        let started = Instant::now();
        let result = adapter.cancel_order(req).await;
        self.record_latency(venue, started.elapsed(), common::now_ns());
        let report = result?;
        self.emit(venue, &report);
        Ok(report)
    }
}
