//! Liquidity-aware order splitting across ranked venues (`spec.md` §4.G).

use common::Venue;

/// One child slice of a split parent order.
#[derive(Debug, Clone, Copy)]
pub struct OrderSplit {
    /// Venue this slice routes to.
    pub venue: Venue,
    /// Quantity allocated to this slice.
    pub qty: f64,
    /// Top-of-book price observed for this venue at split time.
    pub expected_price: f64,
}

/// One ranked venue candidate, as fed into [`split_order`].
#[derive(Debug, Clone, Copy)]
pub struct SplitCandidate {
    /// Venue.
    pub venue: Venue,
    /// Price observed on the favorable side.
    pub observed_price: f64,
    /// Total quantity available on the favorable side (not limited to top-K).
    pub available_liquidity: f64,
    /// Venue's minimum acceptable order size; skip below this.
    pub min_order_size: f64,
}

/// Greedily allocate `qty` across `candidates` (already ranked best-first),
/// each venue capped at `max_single_venue_pct · qty` and its own observed
/// liquidity, skipping venues whose allocation would fall below their
/// `min_order_size` (`spec.md` §4.G). Returns the splits and the quantity
/// left unallocated when combined venue liquidity falls short of `qty`
/// (`spec.md` §8 testable property 7); callers must check the shortfall
/// rather than assume the splits sum to `qty`.
#[must_use]
pub fn split_order(candidates: &[SplitCandidate], qty: f64, max_single_venue_pct: f64) -> (Vec<OrderSplit>, f64) {
    let per_venue_cap = max_single_venue_pct * qty;
    let mut remaining = qty;
    let mut splits = Vec::new();

    for candidate in candidates {
        if remaining <= common::QTY_EPS {
            break;
        }
        let allocation = per_venue_cap.min(candidate.available_liquidity).min(remaining);
        if allocation < candidate.min_order_size {
            continue;
        }
        splits.push(OrderSplit {
            venue: candidate.venue,
            qty: allocation,
            expected_price: candidate.observed_price,
        });
        remaining -= allocation;
    }
    let shortfall = remaining.max(0.0);
    (splits, shortfall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(venue: Venue, price: f64, liquidity: f64, min_size: f64) -> SplitCandidate {
        SplitCandidate {
            venue,
            observed_price: price,
            available_liquidity: liquidity,
            min_order_size: min_size,
        }
    }

    #[test]
    fn s8_split_sums_to_requested_qty_when_liquidity_sufficient() {
        let candidates = vec![
            candidate(Venue::Okx, 100.0, 3.0, 0.0),
            candidate(Venue::Binance, 100.5, 10.0, 0.0),
        ];
        let (splits, shortfall) = split_order(&candidates, 5.0, 0.5);
        let total: f64 = splits.iter().map(|s| s.qty).sum();
        assert!((total - 5.0).abs() < 1e-9);
        assert_eq!(shortfall, 0.0);
    }

    #[test]
    fn venue_below_min_order_size_is_skipped() {
        let candidates = vec![
            candidate(Venue::Okx, 100.0, 0.2, 1.0),
            candidate(Venue::Binance, 100.5, 10.0, 0.0),
        ];
        let (splits, shortfall) = split_order(&candidates, 5.0, 1.0);
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].venue, Venue::Binance);
        assert_eq!(shortfall, 0.0);
    }

    #[test]
    fn max_single_venue_pct_caps_first_allocation() {
        let candidates = vec![
            candidate(Venue::Okx, 100.0, 100.0, 0.0),
            candidate(Venue::Binance, 100.5, 100.0, 0.0),
        ];
        let (splits, shortfall) = split_order(&candidates, 10.0, 0.3);
        assert_eq!(splits[0].qty, 3.0);
        assert_eq!(shortfall, 0.0);
    }

    #[test]
    fn insufficient_total_liquidity_reports_shortfall() {
        let candidates = vec![
            candidate(Venue::Okx, 100.0, 2.0, 0.0),
            candidate(Venue::Binance, 100.5, 1.0, 0.0),
        ];
        let (splits, shortfall) = split_order(&candidates, 10.0, 1.0);
        let total: f64 = splits.iter().map(|s| s.qty).sum();
        assert!((total - 3.0).abs() < 1e-9);
        assert!((shortfall - 7.0).abs() < 1e-9);
    }
}
