//! Routing strategy configuration and the decision record returned by
//! [`crate::ExchangeCoordinator::place_order`] (`spec.md` §4.F).

use common::Venue;

/// Venue-selection strategy the Coordinator applies when `place_order` is
/// called without an explicit venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Best price on the order's side, aggregated-BBO-derived.
    BestPrice,
    /// Smallest p50 latency.
    LowestLatency,
    /// Weighted blend of price and latency scores.
    Balanced,
    /// Cycle through registered venues in registration order.
    RoundRobin,
    /// Sample proportional to configured per-venue weights.
    WeightedRandom,
}

/// Routing configuration held by the Coordinator.
#[derive(Debug, Clone, Copy)]
pub struct RoutingConfig {
    /// Active strategy.
    pub strategy: RoutingStrategy,
    /// Weight given to the latency score in [`RoutingStrategy::Balanced`];
    /// the price score gets `1.0 - latency_weight`.
    pub latency_weight: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::BestPrice,
            latency_weight: 0.3,
        }
    }
}

/// The outcome of a venue-selection decision, returned alongside the
/// [`common::ExecutionReport`] from `place_order` so callers can interpret
/// slippage against the prices observed at selection time (`spec.md` §5).
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// The venue chosen.
    pub selected_venue: Venue,
    /// The price observed for the winning venue at selection time.
    pub expected_price: f64,
    /// Every eligible venue's observed price at selection time.
    pub observed_prices: Vec<(Venue, f64)>,
}
