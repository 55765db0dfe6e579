//! Composite venue scoring (`spec.md` §4.G).

use crate::quality::VenueQualityTracker;
use crate::weights::{RoutingWeights, VenueFees};
use common::{OrderSide, SymbolId, Venue};
use coordinator::ExchangeCoordinator;
use dashmap::DashMap;
use exchange_adapters::Level;
use std::time::Duration;

/// One venue's scored routing candidacy.
#[derive(Debug, Clone, Copy)]
pub struct RoutingScore {
    /// The venue.
    pub venue: Venue,
    /// Final weighted composite score.
    pub score: f64,
    /// Fee-adjusted price component, normalized to `[0, 1]`.
    pub price_score: f64,
    /// Fee component, normalized to `[0, 1]`.
    pub fee_score: f64,
    /// Latency component, normalized to `[0, 1]`.
    pub latency_score: f64,
    /// Liquidity component, normalized to `[0, 1]`.
    pub liquidity_score: f64,
    /// Reliability component, normalized to `[0, 1]`.
    pub reliability_score: f64,
    /// The top-of-book price on the favorable side this score was computed from.
    pub observed_price: f64,
}

fn side_levels<'a>(bid: &'a [Level], ask: &'a [Level], side: OrderSide) -> &'a [Level] {
    match side {
        OrderSide::Buy => ask,
        OrderSide::Sell => bid,
    }
}

fn favorable_price(levels: &[Level]) -> Option<f64> {
    levels.first().map(|l| l.price)
}

fn liquidity_within_top_k(levels: &[Level], top_k: usize, requested_qty: f64) -> f64 {
    if requested_qty <= 0.0 {
        return 1.0;
    }
    let available: f64 = levels.iter().take(top_k).map(|l| l.qty).sum();
    (available / requested_qty).min(1.0)
}

/// Compute a [`RoutingScore`] for every registered, quoting venue, sorted
/// descending by `score` (`spec.md` §4.G).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn compute_scores(
    coordinator: &ExchangeCoordinator,
    quality: &VenueQualityTracker,
    fees: &DashMap<Venue, VenueFees>,
    weights: RoutingWeights,
    symbol: &SymbolId,
    side: OrderSide,
    qty: f64,
    top_k: usize,
    now_ns: u64,
) -> Vec<RoutingScore> {
    let book = coordinator.get_or_create_book(symbol);
    let stale: std::collections::HashSet<Venue> =
        book.get_venues().into_iter().filter(|v| v.is_stale).map(|v| v.venue).collect();

    struct Candidate {
        venue: Venue,
        effective_price: f64,
        observed_price: f64,
        liquidity: f64,
        p50: Duration,
        fee_floor: f64,
    }

    let mut candidates = Vec::new();
    for venue in coordinator.registered_venues() {
        if stale.contains(&venue) {
            continue;
        }
        let Some((bids, asks)) = book.get_venue_depth(venue) else {
            continue;
        };
        let levels = side_levels(&bids, &asks, side);
        let Some(observed_price) = favorable_price(levels) else {
            continue;
        };
        let fee = fees.get(&venue).map(|f| *f).unwrap_or_default();
        let effective_price = match side {
            OrderSide::Buy => observed_price * (1.0 + fee.taker_fee),
            OrderSide::Sell => observed_price * (1.0 - fee.taker_fee),
        };
        candidates.push(Candidate {
            venue,
            effective_price,
            observed_price,
            liquidity: liquidity_within_top_k(levels, top_k, qty),
            p50: coordinator.latency_stats(venue, now_ns).map(|s| s.p50).unwrap_or(Duration::MAX),
            fee_floor: fee.maker_fee.min(fee.taker_fee),
        });
    }

    if candidates.is_empty() {
        return Vec::new();
    }

    let min_eff = candidates.iter().map(|c| c.effective_price).fold(f64::INFINITY, f64::min);
    let max_eff = candidates.iter().map(|c| c.effective_price).fold(f64::NEG_INFINITY, f64::max);
    let eff_range = (max_eff - min_eff).max(f64::EPSILON);

    let max_fee_seen = candidates.iter().map(|c| c.fee_floor).fold(0.0_f64, f64::max).max(f64::EPSILON);

    let max_p50 = candidates
        .iter()
        .map(|c| c.p50)
        .filter(|d| *d != Duration::MAX)
        .max()
        .unwrap_or(Duration::from_millis(1))
        .as_secs_f64()
        .max(f64::EPSILON);

    let mut scores: Vec<RoutingScore> = candidates
        .into_iter()
        .map(|c| {
            let price_score = match side {
                OrderSide::Buy => 1.0 - (c.effective_price - min_eff) / eff_range,
                OrderSide::Sell => (c.effective_price - min_eff) / eff_range,
            };
            let fee_score = 1.0 - (c.fee_floor / max_fee_seen);
            let latency_score = if c.p50 == Duration::MAX {
                0.0
            } else {
                1.0 - (c.p50.as_secs_f64() / max_p50)
            };
            let reliability_score = quality.reliability_score(c.venue);
            let score = weights.w_price * price_score
                + weights.w_fee * fee_score
                + weights.w_latency * latency_score
                + weights.w_liquidity * c.liquidity
                + weights.w_reliability * reliability_score;
            RoutingScore {
                venue: c.venue,
                score,
                price_score,
                fee_score,
                latency_score,
                liquidity_score: c.liquidity,
                reliability_score,
                observed_price: c.observed_price,
            }
        })
        .collect();

    scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_adapters::MockAdapter;
    use market_data::LatencyTracker;
    use positions::PositionAggregator;
    use std::sync::Arc;

    fn lvl(price: f64, qty: f64) -> Level {
        Level { price, qty }
    }

    #[test]
    fn best_effective_price_dominates_when_other_weights_are_zero() {
        let coord = ExchangeCoordinator::new(
            Arc::new(LatencyTracker::new(16, Duration::from_secs(60))),
            Arc::new(PositionAggregator::new()),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        coord.register_adapter(Venue::Binance, Arc::new(MockAdapter::new("binance")));
        coord.register_adapter(Venue::Okx, Arc::new(MockAdapter::new("okx")));

        let symbol = SymbolId::new("BTCUSDT");
        let book = coord.get_or_create_book(&symbol);
        book.update_venue(Venue::Binance, vec![lvl(100.0, 5.0)], vec![lvl(101.0, 5.0)], 0);
        book.update_venue(Venue::Okx, vec![lvl(100.0, 5.0)], vec![lvl(100.5, 5.0)], 0);

        let weights = RoutingWeights {
            w_price: 1.0,
            w_fee: 0.0,
            w_latency: 0.0,
            w_liquidity: 0.0,
            w_reliability: 0.0,
        };
        let quality = VenueQualityTracker::new();
        let fees = DashMap::new();
        let scores = compute_scores(&coord, &quality, &fees, weights, &symbol, OrderSide::Buy, 1.0, 5, 0);
        assert_eq!(scores[0].venue, Venue::Okx);
    }
}
