//! Scoring weights for [`crate::router::SmartOrderRouter`] (`spec.md` §4.G).

/// Weights applied to each score component. Need not sum to exactly `1.0`
/// (the caller is trusted), but the documented default does.
#[derive(Debug, Clone, Copy)]
pub struct RoutingWeights {
    /// Weight on the fee-adjusted price score.
    pub w_price: f64,
    /// Weight on the fee score.
    pub w_fee: f64,
    /// Weight on the latency score.
    pub w_latency: f64,
    /// Weight on the liquidity score.
    pub w_liquidity: f64,
    /// Weight on the reliability score.
    pub w_reliability: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            w_price: 0.35,
            w_fee: 0.20,
            w_latency: 0.15,
            w_liquidity: 0.20,
            w_reliability: 0.10,
        }
    }
}

/// Per-venue maker/taker fee schedule used by the price and fee scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct VenueFees {
    /// Maker fee, as a fraction (e.g. `0.001` for 10bps).
    pub maker_fee: f64,
    /// Taker fee, as a fraction.
    pub taker_fee: f64,
}

/// Per-venue order-size floor below which the venue is skipped entirely
/// during splitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct VenueLimits {
    /// Minimum order size this venue will accept.
    pub min_order_size: f64,
}
