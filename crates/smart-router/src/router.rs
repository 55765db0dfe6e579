//! [G] Smart Order Router: composite venue scoring, splitting, batch
//! execution, and execution-quality analytics layered over the
//! [`ExchangeCoordinator`] (`spec.md` §4.G).

use crate::batch::{self, BatchReport, CancelResult};
use crate::quality::{VenueQualitySnapshot, VenueQualityTracker};
use crate::scoring::{self, RoutingScore};
use crate::splitting::{self, OrderSplit, SplitCandidate};
use crate::weights::{RoutingWeights, VenueFees, VenueLimits};
use common::{CoreError, CoreResult, ExecutionReport, OrderSide, PlaceOrderRequest, SymbolId, Venue};
use coordinator::ExchangeCoordinator;
use dashmap::DashMap;
use std::sync::Arc;

/// The depth considered by the liquidity score and by splitting's
/// available-liquidity estimate, absent an explicit override.
const DEFAULT_TOP_K: usize = 10;

/// Higher-level router layered over the Coordinator: composite scoring,
/// liquidity-aware splitting, batch execution, and per-venue analytics.
pub struct SmartOrderRouter {
    coordinator: Arc<ExchangeCoordinator>,
    weights: parking_lot::RwLock<RoutingWeights>,
    fees: DashMap<Venue, VenueFees>,
    limits: DashMap<Venue, VenueLimits>,
    quality: VenueQualityTracker,
    top_k: usize,
}

impl SmartOrderRouter {
    /// Build a router over `coordinator` with the default weights.
    #[must_use]
    pub fn new(coordinator: Arc<ExchangeCoordinator>) -> Self {
        Self {
            coordinator,
            weights: parking_lot::RwLock::new(RoutingWeights::default()),
            fees: DashMap::new(),
            limits: DashMap::new(),
            quality: VenueQualityTracker::new(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Replace the active scoring weights.
    pub fn set_weights(&self, weights: RoutingWeights) {
        *self.weights.write() = weights;
    }

    /// Set `venue`'s maker/taker fee schedule.
    pub fn set_venue_fees(&self, venue: Venue, fees: VenueFees) {
        self.fees.insert(venue, fees);
    }

    /// Set `venue`'s minimum order size.
    pub fn set_venue_limits(&self, venue: Venue, limits: VenueLimits) {
        self.limits.insert(venue, limits);
    }

    /// Score every eligible venue for `(symbol, side, qty)`, best first.
    #[must_use]
    pub fn compute_scores(&self, symbol: &SymbolId, side: OrderSide, qty: f64, now_ns: u64) -> Vec<RoutingScore> {
        scoring::compute_scores(
            &self.coordinator,
            &self.quality,
            &self.fees,
            *self.weights.read(),
            symbol,
            side,
            qty,
            self.top_k,
            now_ns,
        )
    }

    /// The single best-scored venue, if any venue is quoting.
    #[must_use]
    pub fn best_venue(&self, symbol: &SymbolId, side: OrderSide, qty: f64, now_ns: u64) -> Option<RoutingScore> {
        self.compute_scores(symbol, side, qty, now_ns).into_iter().next()
    }

    /// Split `qty` across ranked venues, each capped at
    /// `max_single_venue_pct · qty` and skipped below its `min_order_size`.
    /// Returns the splits and the quantity left unallocated when combined
    /// venue liquidity falls short of `qty` (`spec.md` §4.G, §8 testable
    /// property 7).
    #[must_use]
    pub fn split_order(
        &self,
        symbol: &SymbolId,
        side: OrderSide,
        qty: f64,
        max_single_venue_pct: f64,
        now_ns: u64,
    ) -> (Vec<OrderSplit>, f64) {
        let scores = self.compute_scores(symbol, side, qty, now_ns);
        let book = self.coordinator.get_or_create_book(symbol);
        let candidates: Vec<SplitCandidate> = scores
            .iter()
            .filter_map(|s| {
                let (bids, asks) = book.get_venue_depth(s.venue)?;
                let levels = match side {
                    OrderSide::Buy => asks,
                    OrderSide::Sell => bids,
                };
                let available_liquidity: f64 = levels.iter().map(|l| l.qty).sum();
                Some(SplitCandidate {
                    venue: s.venue,
                    observed_price: s.observed_price,
                    available_liquidity,
                    min_order_size: self.limits.get(&s.venue).map(|l| l.min_order_size).unwrap_or(0.0),
                })
            })
            .collect();
        splitting::split_order(&candidates, qty, max_single_venue_pct)
    }

    /// Route `req` via the current scoring strategy and place it through the
    /// Coordinator, recording reliability on success/failure and, on a fill,
    /// rolling execution-quality analytics. Returns the venue the order was
    /// routed to alongside the resulting report.
    pub async fn route_and_place(&self, req: &PlaceOrderRequest, now_ns: u64) -> CoreResult<(Venue, ExecutionReport)> {
        let best = self
            .best_venue(&req.symbol, req.side, req.qty, now_ns)
            .ok_or_else(|| CoreError::Validation {
                reason: "no eligible venue for smart routing".to_string(),
            })?;
        let started = std::time::Instant::now();
        let result = self.coordinator.place_order(req, Some(best.venue), now_ns).await;
        let execution_time_ns = started.elapsed().as_nanos() as u64;
        match &result {
            Ok(report) => {
                self.quality.record_success(best.venue);
                if report.last_fill_qty > common::QTY_EPS {
                    let taker_fee = self.fees.get(&best.venue).map(|f| f.taker_fee).unwrap_or(0.0);
                    let fee_paid = report.last_fill_qty * report.last_fill_price * taker_fee;
                    self.record_execution(
                        best.venue,
                        best.observed_price,
                        report.last_fill_price,
                        req.qty,
                        report.last_fill_qty,
                        execution_time_ns,
                        fee_paid,
                    );
                }
            }
            Err(_) => self.quality.record_failure(best.venue),
        }
        result.map(|report| (best.venue, report))
    }

    /// Place every `(venue, request)` pair, atomically or independently
    /// (`spec.md` §4.G).
    pub async fn execute_batch(&self, requests: &[(Venue, PlaceOrderRequest)], atomic: bool, now_ns: u64) -> BatchReport {
        let report = batch::execute_batch(&self.coordinator, requests, atomic, now_ns).await;
        for outcome in &report.results {
            if outcome.is_ok() {
                self.quality.record_success(outcome.venue);
            } else {
                self.quality.record_failure(outcome.venue);
            }
        }
        report
    }

    /// Cancel `ids`, serially per venue and concurrently across venues.
    pub async fn cancel_merged(&self, ids: &[(Venue, SymbolId, String)]) -> Vec<CancelResult> {
        batch::cancel_merged(&self.coordinator, ids).await
    }

    /// Fold one completed execution into `venue`'s rolling analytics.
    #[allow(clippy::too_many_arguments)]
    pub fn record_execution(
        &self,
        venue: Venue,
        expected_price: f64,
        fill_price: f64,
        requested_qty: f64,
        filled_qty: f64,
        execution_time_ns: u64,
        fee_paid: f64,
    ) {
        self.quality
            .record_execution(venue, expected_price, fill_price, requested_qty, filled_qty, execution_time_ns, fee_paid);
    }

    /// Current rolling execution-quality snapshot for `venue`.
    #[must_use]
    pub fn get_venue_quality(&self, venue: Venue) -> Option<VenueQualitySnapshot> {
        self.quality.snapshot(venue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderType, TimeInForce};
    use exchange_adapters::{Level, MockAdapter};
    use market_data::LatencyTracker;
    use positions::PositionAggregator;
    use std::time::Duration;

    fn lvl(price: f64, qty: f64) -> Level {
        Level { price, qty }
    }

    fn router_with_two_venues() -> (SmartOrderRouter, SymbolId) {
        let coord = Arc::new(ExchangeCoordinator::new(
            Arc::new(LatencyTracker::new(16, Duration::from_secs(60))),
            Arc::new(PositionAggregator::new()),
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        coord.register_adapter(Venue::Binance, Arc::new(MockAdapter::new("binance")));
        coord.register_adapter(Venue::Okx, Arc::new(MockAdapter::new("okx")));
        let symbol = SymbolId::new("BTCUSDT");
        let book = coord.get_or_create_book(&symbol);
        book.update_venue(Venue::Binance, vec![lvl(100.0, 5.0)], vec![lvl(101.0, 5.0)], 0);
        book.update_venue(Venue::Okx, vec![lvl(100.0, 3.0)], vec![lvl(100.5, 2.0)], 0);
        (SmartOrderRouter::new(coord), symbol)
    }

    #[test]
    fn s8_split_order_liquidity_sums_to_requested_quantity() {
        let (router, symbol) = router_with_two_venues();
        let (splits, shortfall) = router.split_order(&symbol, OrderSide::Buy, 6.0, 1.0, 0);
        let total: f64 = splits.iter().map(|s| s.qty).sum();
        assert!((total - 6.0).abs() < 1e-9, "splits should fully cover requested qty: {splits:?}");
        assert_eq!(shortfall, 0.0);
    }

    #[test]
    fn split_order_reports_shortfall_when_liquidity_insufficient() {
        let (router, symbol) = router_with_two_venues();
        let (splits, shortfall) = router.split_order(&symbol, OrderSide::Buy, 50.0, 1.0, 0);
        let total: f64 = splits.iter().map(|s| s.qty).sum();
        assert!((total + shortfall - 50.0).abs() < 1e-9);
        assert!(shortfall > 0.0);
    }

    #[tokio::test]
    async fn route_and_place_records_execution_quality_on_fill() {
        let (router, symbol) = router_with_two_venues();
        router.set_venue_fees(Venue::Binance, VenueFees { maker_fee: 0.0, taker_fee: 0.001 });
        router.set_venue_fees(Venue::Okx, VenueFees { maker_fee: 0.0, taker_fee: 0.001 });
        let req = PlaceOrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            qty: 1.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".into(),
            strategy_id: "s1".into(),
            reduce_only: false,
            post_only: false,
        };
        let (venue, report) = router.route_and_place(&req, 0).await.unwrap();
        assert_eq!(report.client_order_id, "c1");
        // MockAdapter acks without filling, so quality gains a try but no
        // execution sample; exercise record_execution directly as the live
        // execution path would once a fill report arrives.
        router.record_execution(venue, 100.5, 100.5, 1.0, 1.0, 1_000_000, 0.1);
        assert!(router.get_venue_quality(venue).is_some());
    }

    #[tokio::test]
    async fn route_and_place_dispatches_to_best_scored_venue() {
        let (router, symbol) = router_with_two_venues();
        let req = PlaceOrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            qty: 1.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".into(),
            strategy_id: "s1".into(),
            reduce_only: false,
            post_only: false,
        };
        let (_venue, report) = router.route_and_place(&req, 0).await.unwrap();
        assert_eq!(report.client_order_id, "c1");
    }

    #[tokio::test]
    async fn non_atomic_batch_reports_independent_outcomes() {
        let (router, symbol) = router_with_two_venues();
        let mk_req = |id: &str| PlaceOrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            qty: 1.0,
            price: None,
            stop_price: None,
            client_order_id: id.to_string(),
            strategy_id: "s1".into(),
            reduce_only: false,
            post_only: false,
        };
        let batch = vec![(Venue::Binance, mk_req("a")), (Venue::Okx, mk_req("b"))];
        let report = router.execute_batch(&batch, false, 0).await;
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 0);
        assert!(report.compensated.is_empty());
    }
}
