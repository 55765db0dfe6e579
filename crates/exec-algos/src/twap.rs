//! TWAP parent algorithm (`spec.md` §4.H).

use crate::progress::{AlgoProgress, AlgoState, ChildSlice};
use common::{
    ClientOrderIdGenerator, CoreResult, OrderSide, OrderType, PlaceOrderRequest, SymbolId, TimeInForce,
    Venue, QTY_EPS,
};
use rand::Rng;
use smart_router::SmartOrderRouter;
use std::collections::HashMap;
use std::time::Duration;

/// Static configuration for one TWAP run.
#[derive(Debug, Clone)]
pub struct TwapConfig {
    /// Symbol to trade.
    pub symbol: SymbolId,
    /// Buy or sell.
    pub side: OrderSide,
    /// Total quantity to work over `duration`.
    pub total_qty: f64,
    /// Total span over which slices are scheduled.
    pub duration: Duration,
    /// Nominal interval between slices.
    pub slice_interval: Duration,
    /// Use limit orders offset from mid instead of market orders.
    pub use_limit_orders: bool,
    /// Limit price offset from mid, in basis points, applied in the
    /// direction that favors a fill (above mid for Buy, below for Sell).
    pub limit_offset_bps: f64,
    /// Randomization applied to slice quantity and interval, as a fraction
    /// (e.g. `0.1` for ±10%). `0.0` disables jitter.
    pub jitter_pct: f64,
    /// Slices below this size are skipped rather than sent.
    pub min_slice_qty: f64,
    /// Strategy id used for generated client order ids.
    pub strategy_id: String,
}

fn jittered(value: f64, pct: f64) -> f64 {
    if pct <= 0.0 {
        return value;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-pct..=pct);
    value * factor
}

fn mid_price(bid: f64, ask: f64) -> f64 {
    (bid + ask) / 2.0
}

fn limit_price(mid: f64, side: OrderSide, offset_bps: f64) -> f64 {
    let offset = mid * offset_bps / 10_000.0;
    match side {
        OrderSide::Buy => mid + offset,
        OrderSide::Sell => mid - offset,
    }
}

/// A single time-weighted-average-price parent order (`spec.md` §4.H).
pub struct TwapAlgorithm {
    id: String,
    config: TwapConfig,
    state: AlgoState,
    total_slices: usize,
    remaining_slices: usize,
    remaining_qty: f64,
    filled_qty: f64,
    total_value: f64,
    child_orders_sent: u64,
    child_orders_filled: u64,
    children: HashMap<String, ChildSlice>,
    start_ns: Option<u64>,
    next_slice_time_ns: Option<u64>,
    last_bid: f64,
    last_ask: f64,
    id_gen: ClientOrderIdGenerator,
}

impl TwapAlgorithm {
    /// Build a TWAP run in `Pending` state.
    #[must_use]
    pub fn new(id: impl Into<String>, config: TwapConfig) -> Self {
        let total_slices = (config.duration.as_nanos() / config.slice_interval.as_nanos().max(1)).max(1) as usize;
        let strategy_id = config.strategy_id.clone();
        Self {
            id: id.into(),
            config,
            state: AlgoState::Pending,
            total_slices,
            remaining_slices: total_slices,
            remaining_qty: 0.0,
            filled_qty: 0.0,
            total_value: 0.0,
            child_orders_sent: 0,
            child_orders_filled: 0,
            children: HashMap::new(),
            start_ns: None,
            next_slice_time_ns: None,
            last_bid: 0.0,
            last_ask: 0.0,
            id_gen: ClientOrderIdGenerator::new(strategy_id),
        }
    }

    /// Algorithm id, as registered with [`crate::AlgorithmManager`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AlgoState {
        self.state
    }

    /// Total number of slices `duration`/`slice_interval` scheduled at start.
    #[must_use]
    pub fn total_slices(&self) -> usize {
        self.total_slices
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn progress(&self, now_ns: u64) -> AlgoProgress {
        AlgoProgress {
            filled_qty: self.filled_qty,
            average_price: if self.filled_qty > QTY_EPS { self.total_value / self.filled_qty } else { 0.0 },
            progress_pct: if self.config.total_qty > 0.0 { self.filled_qty / self.config.total_qty * 100.0 } else { 0.0 },
            child_orders_sent: self.child_orders_sent,
            child_orders_filled: self.child_orders_filled,
            elapsed: self.start_ns.map(|s| Duration::from_nanos(now_ns.saturating_sub(s))).unwrap_or_default(),
            remaining: (self.config.total_qty - self.filled_qty).max(0.0),
        }
    }

    /// Start scheduling. Only valid from `Pending`.
    pub fn start(&mut self, now_ns: u64) {
        if self.state != AlgoState::Pending {
            return;
        }
        self.state = AlgoState::Running;
        self.remaining_qty = self.config.total_qty;
        self.start_ns = Some(now_ns);
        self.next_slice_time_ns = Some(now_ns);
    }

    /// Suspend scheduling. Only valid from `Running`.
    pub fn pause(&mut self) {
        if self.state == AlgoState::Running {
            self.state = AlgoState::Paused;
        }
    }

    /// Resume scheduling. Only valid from `Paused`.
    pub fn resume(&mut self) {
        if self.state == AlgoState::Paused {
            self.state = AlgoState::Running;
        }
    }

    /// Cancel: transitions to `Cancelled` and refuses further child
    /// emissions. Outstanding children must still be cancelled by the
    /// caller through [`Self::open_children`].
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = AlgoState::Cancelled;
        }
    }

    /// Children that have not reached a terminal fill state.
    #[must_use]
    pub fn open_children(&self) -> Vec<(Venue, SymbolId, String)> {
        self.children
            .values()
            .filter(|c| c.filled_qty + QTY_EPS < c.qty)
            .map(|c| (c.venue, self.config.symbol.clone(), c.client_order_id.clone()))
            .collect()
    }

    /// Refresh reference prices used for limit-offset pricing.
    pub fn on_market_update(&mut self, bid: f64, ask: f64, _volume: f64) {
        self.last_bid = bid;
        self.last_ask = ask;
    }

    /// Apply a fill observed for one of this algorithm's children.
    pub fn on_fill(&mut self, child_id: &str, qty: f64, price: f64) {
        let Some(child) = self.children.get_mut(child_id) else {
            return;
        };
        child.filled_qty += qty;
        self.filled_qty += qty;
        self.total_value += qty * price;
        if child.filled_qty + QTY_EPS >= child.qty {
            child.status = common::OrderStatus::Filled;
            self.child_orders_filled += 1;
        }
        if self.filled_qty + QTY_EPS >= self.config.total_qty && !self.state.is_terminal() {
            self.state = AlgoState::Completed;
        }
    }

    fn advance_schedule(&mut self, now_ns: u64) {
        self.remaining_slices = self.remaining_slices.saturating_sub(1);
        let next_interval = jittered(self.config.slice_interval.as_secs_f64(), self.config.jitter_pct).max(0.0);
        self.next_slice_time_ns = Some(now_ns + (next_interval * 1e9) as u64);
        if self.remaining_slices == 0 && self.remaining_qty <= QTY_EPS {
            self.next_slice_time_ns = None;
        }
    }

    /// Emit the next slice if `now_ns` has reached the scheduled time and
    /// the algorithm is `Running` (`spec.md` §4.H). Returns the emitted
    /// child's client order id, if any.
    pub async fn on_tick(&mut self, now_ns: u64, router: &SmartOrderRouter) -> CoreResult<Option<String>> {
        if self.state != AlgoState::Running {
            return Ok(None);
        }
        if self.remaining_qty <= QTY_EPS || self.remaining_slices == 0 {
            if self.filled_qty + QTY_EPS >= self.config.total_qty {
                self.state = AlgoState::Completed;
            }
            return Ok(None);
        }
        let Some(next_time) = self.next_slice_time_ns else {
            return Ok(None);
        };
        if now_ns < next_time {
            return Ok(None);
        }

        let raw_qty = self.remaining_qty / self.remaining_slices as f64;
        let slice_qty = jittered(raw_qty, self.config.jitter_pct).min(self.remaining_qty).max(0.0);

        if slice_qty < self.config.min_slice_qty {
            self.advance_schedule(now_ns);
            return Ok(None);
        }

        let client_order_id = self.id_gen.generate();
        let price = if self.config.use_limit_orders {
            Some(limit_price(mid_price(self.last_bid, self.last_ask), self.config.side, self.config.limit_offset_bps))
        } else {
            None
        };
        let req = PlaceOrderRequest {
            symbol: self.config.symbol.clone(),
            side: self.config.side,
            order_type: if self.config.use_limit_orders { OrderType::Limit } else { OrderType::Market },
            time_in_force: TimeInForce::Gtc,
            qty: slice_qty,
            price,
            stop_price: None,
            client_order_id: client_order_id.clone(),
            strategy_id: self.config.strategy_id.clone(),
            reduce_only: false,
            post_only: false,
        };

        let result = router.route_and_place(&req, now_ns).await;
        match result {
            Ok((venue, report)) => {
                self.remaining_qty -= slice_qty;
                self.child_orders_sent += 1;
                self.children.insert(
                    client_order_id.clone(),
                    ChildSlice {
                        client_order_id: client_order_id.clone(),
                        venue,
                        qty: slice_qty,
                        price,
                        filled_qty: 0.0,
                        status: report.status,
                    },
                );
                self.advance_schedule(now_ns);
                Ok(Some(client_order_id))
            }
            Err(e) => {
                self.state = AlgoState::Failed;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::ExchangeCoordinator;
    use exchange_adapters::{Level, MockAdapter};
    use market_data::LatencyTracker;
    use positions::PositionAggregator;
    use std::sync::Arc;

    fn router_fixture(symbol: &SymbolId) -> SmartOrderRouter {
        let coord = Arc::new(ExchangeCoordinator::new(
            Arc::new(LatencyTracker::new(16, Duration::from_secs(60))),
            Arc::new(PositionAggregator::new()),
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        coord.register_adapter(Venue::Binance, Arc::new(MockAdapter::new("binance")));
        let book = coord.get_or_create_book(symbol);
        book.update_venue(Venue::Binance, vec![Level { price: 100.0, qty: 100.0 }], vec![Level { price: 100.5, qty: 100.0 }], 0);
        SmartOrderRouter::new(coord)
    }

    fn config(symbol: SymbolId) -> TwapConfig {
        TwapConfig {
            symbol,
            side: OrderSide::Buy,
            total_qty: 10.0,
            duration: Duration::from_secs(40),
            slice_interval: Duration::from_secs(10),
            use_limit_orders: false,
            limit_offset_bps: 0.0,
            jitter_pct: 0.0,
            min_slice_qty: 0.1,
            strategy_id: "TWAP".into(),
        }
    }

    #[test]
    fn total_slices_derives_from_duration_and_interval() {
        let symbol = SymbolId::new("BTCUSDT");
        let algo = TwapAlgorithm::new("twap-1", config(symbol));
        assert_eq!(algo.total_slices(), 4);
    }

    #[tokio::test]
    async fn s6_four_equal_slices_sum_to_target_quantity() {
        let symbol = SymbolId::new("BTCUSDT");
        let router = router_fixture(&symbol);
        let mut algo = TwapAlgorithm::new("twap-1", config(symbol));
        algo.start(0);
        algo.on_market_update(100.0, 100.5, 0.0);

        let mut sent: f64 = 0.0;
        for tick in 0..4 {
            let now = tick * 10_000_000_000;
            let id = algo.on_tick(now, &router).await.unwrap();
            assert!(id.is_some());
            sent += 10.0 / 4.0;
        }
        assert!((sent - 10.0).abs() < 1e-9);
        assert_eq!(algo.progress(40_000_000_000).child_orders_sent, 4);
    }

    #[test]
    fn pause_blocks_resume_allows_transitions() {
        let symbol = SymbolId::new("BTCUSDT");
        let mut algo = TwapAlgorithm::new("twap-1", config(symbol));
        algo.start(0);
        algo.pause();
        assert_eq!(algo.state(), AlgoState::Paused);
        algo.resume();
        assert_eq!(algo.state(), AlgoState::Running);
    }

    #[test]
    fn cancel_is_terminal_and_final() {
        let symbol = SymbolId::new("BTCUSDT");
        let mut algo = TwapAlgorithm::new("twap-1", config(symbol));
        algo.start(0);
        algo.cancel();
        assert_eq!(algo.state(), AlgoState::Cancelled);
        algo.resume();
        assert_eq!(algo.state(), AlgoState::Cancelled);
    }

    #[tokio::test]
    async fn completing_all_fills_marks_completed() {
        let symbol = SymbolId::new("BTCUSDT");
        let router = router_fixture(&symbol);
        let mut algo = TwapAlgorithm::new("twap-1", config(symbol));
        algo.start(0);
        algo.on_market_update(100.0, 100.5, 0.0);
        let id = algo.on_tick(0, &router).await.unwrap().unwrap();
        algo.on_fill(&id, 2.5, 100.2);
        for tick in 1..4 {
            let now = tick * 10_000_000_000;
            let id = algo.on_tick(now, &router).await.unwrap().unwrap();
            algo.on_fill(&id, 2.5, 100.2);
        }
        assert_eq!(algo.state(), AlgoState::Completed);
    }
}
