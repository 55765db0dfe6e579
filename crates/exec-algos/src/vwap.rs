//! VWAP parent algorithm (`spec.md` §4.H).

use crate::progress::{AlgoProgress, AlgoState, ChildSlice};
use common::{
    ClientOrderIdGenerator, CoreResult, OrderSide, OrderType, PlaceOrderRequest, SymbolId, TimeInForce,
    Venue, QTY_EPS,
};
use smart_router::SmartOrderRouter;
use std::collections::HashMap;
use std::time::Duration;

/// Static configuration for one VWAP run.
#[derive(Debug, Clone)]
pub struct VwapConfig {
    /// Symbol to trade.
    pub symbol: SymbolId,
    /// Buy or sell.
    pub side: OrderSide,
    /// Total quantity to work across the profile.
    pub total_qty: f64,
    /// Nominal interval between slices.
    pub slice_interval: Duration,
    /// Number of slices to work the order over. `volume_profile` is
    /// truncated if longer than this, or padded with the remaining uniform
    /// share `(1 - sum_so_far) / remaining_slices` if shorter
    /// (`spec.md` §9 open question 4).
    pub total_slices: usize,
    /// Fractions of `total_qty` for each slice, summing to `1.0`. Normalized
    /// to `total_slices` entries by [`VwapAlgorithm::new`].
    pub volume_profile: Vec<f64>,
    /// Caps each slice at `participation_rate · recent_observed_volume`.
    pub participation_rate: Option<f64>,
    /// Use limit orders offset from mid instead of market orders.
    pub use_limit_orders: bool,
    /// Limit price offset from mid, in basis points.
    pub limit_offset_bps: f64,
    /// Slices below this size are skipped rather than sent.
    pub min_slice_qty: f64,
    /// Strategy id used for generated client order ids.
    pub strategy_id: String,
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

/// A single volume-weighted-average-price parent order (`spec.md` §4.H).
///
/// Shaped by a caller-supplied historical `volume_profile` instead of TWAP's
/// equal slicing, and optionally capped by live participation in observed
/// market volume.
pub struct VwapAlgorithm {
    id: String,
    config: VwapConfig,
    state: AlgoState,
    current_slice: usize,
    filled_qty: f64,
    total_value: f64,
    child_orders_sent: u64,
    child_orders_filled: u64,
    children: HashMap<String, ChildSlice>,
    start_ns: Option<u64>,
    next_slice_time_ns: Option<u64>,
    last_bid: f64,
    last_ask: f64,
    volume_since_last_slice: f64,
    id_gen: ClientOrderIdGenerator,
}

/// Truncate or pad `profile` to exactly `total_slices` entries. Padding uses
/// the remaining uniform share `(1 - sum_so_far) / remaining_slices` so the
/// profile still sums to approximately `1.0` (`spec.md` §9 open question 4).
fn normalize_profile(mut profile: Vec<f64>, total_slices: usize) -> Vec<f64> {
    if profile.len() > total_slices {
        profile.truncate(total_slices);
    } else if profile.len() < total_slices {
        let sum_so_far: f64 = profile.iter().sum();
        let remaining_slices = total_slices - profile.len();
        let remaining_share = (1.0 - sum_so_far).max(0.0) / remaining_slices as f64;
        profile.extend(std::iter::repeat(remaining_share).take(remaining_slices));
    }
    profile
}

impl VwapAlgorithm {
    /// Build a VWAP run in `Pending` state. `config.volume_profile` is
    /// normalized to `config.total_slices` entries (see [`normalize_profile`]).
    #[must_use]
    pub fn new(id: impl Into<String>, mut config: VwapConfig) -> Self {
        let strategy_id = config.strategy_id.clone();
        config.volume_profile = normalize_profile(config.volume_profile, config.total_slices);
        Self {
            id: id.into(),
            config,
            state: AlgoState::Pending,
            current_slice: 0,
            filled_qty: 0.0,
            total_value: 0.0,
            child_orders_sent: 0,
            child_orders_filled: 0,
            children: HashMap::new(),
            start_ns: None,
            next_slice_time_ns: None,
            last_bid: 0.0,
            last_ask: 0.0,
            volume_since_last_slice: 0.0,
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
    /// emissions.
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

    /// Refresh reference prices and accumulate observed volume for the
    /// participation-rate cap.
    pub fn on_market_update(&mut self, bid: f64, ask: f64, volume: f64) {
        self.last_bid = bid;
        self.last_ask = ask;
        self.volume_since_last_slice += volume;
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
        self.current_slice += 1;
        self.volume_since_last_slice = 0.0;
        if self.current_slice >= self.config.volume_profile.len() {
            self.next_slice_time_ns = None;
        } else {
            self.next_slice_time_ns = Some(now_ns + self.config.slice_interval.as_nanos() as u64);
        }
    }

    /// Emit the next slice if `now_ns` has reached the scheduled time and
    /// the algorithm is `Running` (`spec.md` §4.H).
    pub async fn on_tick(&mut self, now_ns: u64, router: &SmartOrderRouter) -> CoreResult<Option<String>> {
        if self.state != AlgoState::Running {
            return Ok(None);
        }
        if self.current_slice >= self.config.volume_profile.len() {
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

        let mut slice_qty = self.config.total_qty * self.config.volume_profile[self.current_slice];
        if let Some(rate) = self.config.participation_rate {
            slice_qty = slice_qty.min(rate * self.volume_since_last_slice);
        }
        slice_qty = slice_qty.max(0.0);

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

    fn config(symbol: SymbolId) -> VwapConfig {
        VwapConfig {
            symbol,
            side: OrderSide::Buy,
            total_qty: 100.0,
            slice_interval: Duration::from_secs(60),
            total_slices: 3,
            volume_profile: vec![0.5, 0.3, 0.2],
            participation_rate: None,
            use_limit_orders: false,
            limit_offset_bps: 0.0,
            min_slice_qty: 0.1,
            strategy_id: "VWAP".into(),
        }
    }

    #[tokio::test]
    async fn slices_follow_volume_profile_weighting() {
        let symbol = SymbolId::new("BTCUSDT");
        let router = router_fixture(&symbol);
        let mut algo = VwapAlgorithm::new("vwap-1", config(symbol));
        algo.start(0);
        algo.on_market_update(100.0, 100.5, 0.0);

        algo.on_tick(0, &router).await.unwrap().unwrap();
        assert_eq!(algo.children.values().next().unwrap().qty, 50.0);

        algo.on_tick(60_000_000_000, &router).await.unwrap().unwrap();
        let second = algo.children.values().find(|c| c.qty == 30.0);
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn participation_rate_caps_slice_below_profile_share() {
        let symbol = SymbolId::new("BTCUSDT");
        let router = router_fixture(&symbol);
        let mut cfg = config(symbol);
        cfg.participation_rate = Some(0.1);
        let mut algo = VwapAlgorithm::new("vwap-1", cfg);
        algo.start(0);
        algo.on_market_update(100.0, 100.5, 200.0);

        let id = algo.on_tick(0, &router).await.unwrap().unwrap();
        let child = algo.children.get(&id).unwrap();
        assert!((child.qty - 20.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_profile_truncates_longer_profile() {
        let profile = normalize_profile(vec![0.4, 0.3, 0.2, 0.1], 2);
        assert_eq!(profile, vec![0.4, 0.3]);
    }

    #[test]
    fn normalize_profile_pads_shorter_profile_with_uniform_remainder() {
        let profile = normalize_profile(vec![0.5], 3);
        assert_eq!(profile.len(), 3);
        assert!((profile[1] - 0.25).abs() < 1e-12);
        assert!((profile[2] - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn shorter_profile_is_padded_before_scheduling_slices() {
        let symbol = SymbolId::new("BTCUSDT");
        let router = router_fixture(&symbol);
        let mut cfg = config(symbol);
        cfg.total_slices = 4;
        cfg.volume_profile = vec![0.5, 0.3, 0.2];
        let mut algo = VwapAlgorithm::new("vwap-1", cfg);
        assert_eq!(algo.config.volume_profile.len(), 4);
        assert!((algo.config.volume_profile[3] - 0.0).abs() < 1e-9);
        algo.start(0);
        algo.on_market_update(100.0, 100.5, 0.0);
        for i in 0..4 {
            algo.on_tick(i * 60_000_000_000, &router).await.unwrap();
        }
        assert_eq!(algo.current_slice, 4);
    }
}
