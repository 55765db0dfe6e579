//! [E] Position aggregator: per-(venue, symbol) signed position, average
//! entry price, and realized/unrealized PnL (`spec.md` §4.E).

use common::{OrderSide, SymbolId, Venue, QTY_EPS, ZERO_EPS};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot of one (venue, symbol) position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    /// Signed quantity: positive long, negative short.
    pub quantity: f64,
    /// Volume-weighted average entry price. Always `0.0` when `quantity` is
    /// (within tolerance of) zero.
    pub avg_entry_price: f64,
    /// Cumulative realized PnL from closes/reductions.
    pub realized_pnl: f64,
    /// Mark-to-market PnL against the last price passed to
    /// [`PositionAggregator::update_mark_price`].
    pub unrealized_pnl: f64,
}

impl PositionState {
    fn flat() -> Self {
        Self {
            quantity: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }
}

/// A detected mismatch between the locally-tracked quantity and what the
/// exchange reports for the same (venue, symbol).
#[derive(Debug, Clone)]
pub struct PositionDiscrepancy {
    /// Venue where the mismatch was observed.
    pub venue: Venue,
    /// Symbol.
    pub symbol: SymbolId,
    /// Locally-tracked quantity at the time of the check.
    pub local_qty: f64,
    /// Quantity reported by the exchange.
    pub exchange_qty: f64,
    /// When the check ran, nanoseconds.
    pub ts_ns: u64,
}

fn sign(x: f64) -> i32 {
    if x > QTY_EPS {
        1
    } else if x < -QTY_EPS {
        -1
    } else {
        0
    }
}

/// Owns every (venue, symbol) position the core is tracking. Indexed
/// symbol-first so [`Self::update_mark_price`] touches only the venues
/// holding a position in the target symbol (`spec.md` §9 open question 1),
/// not every tracked symbol.
pub struct PositionAggregator {
    by_symbol: DashMap<SymbolId, DashMap<Venue, PositionState>>,
    #[allow(clippy::type_complexity)]
    discrepancy_callback: RwLock<Option<Arc<dyn Fn(&PositionDiscrepancy) + Send + Sync>>>,
}

impl Default for PositionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_symbol: DashMap::new(),
            discrepancy_callback: RwLock::new(None),
        }
    }

    /// Register a callback invoked every time [`Self::reconcile_position`]
    /// detects a mismatch.
    pub fn set_discrepancy_callback(&self, callback: Arc<dyn Fn(&PositionDiscrepancy) + Send + Sync>) {
        *self.discrepancy_callback.write() = Some(callback);
    }

    /// Apply one fill to the (venue, symbol) position, per the reversal /
    /// crossing-zero math in `spec.md` §4.E. Returns the resulting state.
    pub fn on_fill(&self, venue: Venue, symbol: &SymbolId, side: OrderSide, qty: f64, price: f64) -> PositionState {
        let venue_map = self.by_symbol.entry(symbol.clone()).or_default();
        let mut entry = venue_map.entry(venue).or_insert_with(PositionState::flat);

        let delta = match side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        let old = entry.quantity;
        let old_avg = entry.avg_entry_price;
        let new = old + delta;
        let sign_old = sign(old);
        let sign_new = sign(new);

        if old.abs() <= ZERO_EPS || sign_old == sign_new {
            // Opening from flat, or adding to an existing position in the same direction.
            entry.avg_entry_price = if new.abs() > ZERO_EPS {
                (old.abs() * old_avg + delta.abs() * price) / new.abs()
            } else {
                0.0
            };
        } else if delta.abs() <= old.abs() {
            // Reducing (possibly to exactly flat) without reversing direction.
            let closed = delta.abs().min(old.abs());
            entry.realized_pnl += closed * (price - old_avg) * sign_old as f64;
            entry.avg_entry_price = if new.abs() > ZERO_EPS { old_avg } else { 0.0 };
        } else {
            // Crossing zero: the old position fully closes, the remainder opens fresh.
            let closed = old.abs();
            entry.realized_pnl += closed * (price - old_avg) * sign_old as f64;
            entry.avg_entry_price = price;
        }
        entry.quantity = new;
        *entry
    }

    /// Mark every (venue, symbol) position in `symbol` to `mark`, recomputing
    /// `unrealized_pnl = qty * (mark - avg_entry_price)`.
    pub fn update_mark_price(&self, symbol: &SymbolId, mark: f64) {
        let Some(venue_map) = self.by_symbol.get(symbol) else {
            return;
        };
        for mut entry in venue_map.iter_mut() {
            entry.unrealized_pnl = entry.quantity * (mark - entry.avg_entry_price);
        }
    }

    /// Compare the locally-tracked quantity against `exchange_qty`. A
    /// mismatch beyond `1e-8` is recorded and the discrepancy callback (if
    /// any) is invoked. The aggregator never self-corrects; that is the
    /// reconciler's decision.
    pub fn reconcile_position(
        &self,
        venue: Venue,
        symbol: &SymbolId,
        exchange_qty: f64,
        now_ns: u64,
    ) -> Option<PositionDiscrepancy> {
        let local_qty = self.get_position(venue, symbol).map(|p| p.quantity).unwrap_or(0.0);
        if (local_qty - exchange_qty).abs() <= 1e-8 {
            return None;
        }
        let discrepancy = PositionDiscrepancy {
            venue,
            symbol: symbol.clone(),
            local_qty,
            exchange_qty,
            ts_ns: now_ns,
        };
        if let Some(cb) = self.discrepancy_callback.read().as_ref() {
            cb(&discrepancy);
        }
        Some(discrepancy)
    }

    /// Current state of one (venue, symbol) position, or `None` if it has
    /// never been touched.
    #[must_use]
    pub fn get_position(&self, venue: Venue, symbol: &SymbolId) -> Option<PositionState> {
        self.by_symbol.get(symbol)?.get(&venue).map(|e| *e)
    }

    /// Every venue currently holding a (possibly flat) position in `symbol`.
    #[must_use]
    pub fn get_positions_for_symbol(&self, symbol: &SymbolId) -> Vec<(Venue, PositionState)> {
        self.by_symbol
            .get(symbol)
            .map(|m| m.iter().map(|e| (*e.key(), *e.value())).collect())
            .unwrap_or_default()
    }

    /// Sum of realized + unrealized PnL across every tracked position.
    #[must_use]
    pub fn get_total_pnl(&self) -> f64 {
        self.by_symbol
            .iter()
            .flat_map(|symbol_entry| {
                symbol_entry
                    .value()
                    .iter()
                    .map(|e| e.realized_pnl + e.unrealized_pnl)
                    .collect::<Vec<_>>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn s2_position_math_on_reversal() {
        let agg = PositionAggregator::new();
        let symbol = SymbolId::new("BTCUSDT");

        let s = agg.on_fill(Venue::Binance, &symbol, OrderSide::Buy, 1.0, 50000.0);
        assert_eq!(s.quantity, 1.0);
        assert_eq!(s.avg_entry_price, 50000.0);

        let s = agg.on_fill(Venue::Binance, &symbol, OrderSide::Buy, 1.0, 51000.0);
        assert_eq!(s.quantity, 2.0);
        assert_eq!(s.avg_entry_price, 50500.0);

        let s = agg.on_fill(Venue::Binance, &symbol, OrderSide::Sell, 3.0, 52000.0);
        assert_eq!(s.quantity, -1.0);
        assert_eq!(s.avg_entry_price, 52000.0);
        assert_eq!(s.realized_pnl, 3000.0);
    }

    #[test]
    fn invariant_avg_entry_price_zero_iff_quantity_zero() {
        let agg = PositionAggregator::new();
        let symbol = SymbolId::new("ETHUSDT");
        agg.on_fill(Venue::Okx, &symbol, OrderSide::Buy, 2.0, 3000.0);
        let s = agg.on_fill(Venue::Okx, &symbol, OrderSide::Sell, 2.0, 3100.0);
        assert_eq!(s.quantity, 0.0);
        assert_eq!(s.avg_entry_price, 0.0);
        assert_eq!(s.realized_pnl, 200.0);
    }

    #[test]
    fn reducing_without_reversal_keeps_avg_entry_price() {
        let agg = PositionAggregator::new();
        let symbol = SymbolId::new("ETHUSDT");
        agg.on_fill(Venue::Okx, &symbol, OrderSide::Buy, 5.0, 100.0);
        let s = agg.on_fill(Venue::Okx, &symbol, OrderSide::Sell, 2.0, 110.0);
        assert_eq!(s.quantity, 3.0);
        assert_eq!(s.avg_entry_price, 100.0);
        assert_eq!(s.realized_pnl, 20.0);
    }

    #[test]
    fn short_side_realized_pnl_sign_is_flipped() {
        let agg = PositionAggregator::new();
        let symbol = SymbolId::new("ETHUSDT");
        agg.on_fill(Venue::Okx, &symbol, OrderSide::Sell, 2.0, 100.0);
        let s = agg.on_fill(Venue::Okx, &symbol, OrderSide::Buy, 1.0, 90.0);
        assert_eq!(s.quantity, -1.0);
        assert_eq!(s.avg_entry_price, 100.0);
        assert_eq!(s.realized_pnl, 10.0);
    }

    #[test]
    fn update_mark_price_only_touches_target_symbol() {
        let agg = PositionAggregator::new();
        let btc = SymbolId::new("BTCUSDT");
        let eth = SymbolId::new("ETHUSDT");
        agg.on_fill(Venue::Binance, &btc, OrderSide::Buy, 1.0, 50000.0);
        agg.on_fill(Venue::Binance, &eth, OrderSide::Buy, 1.0, 3000.0);

        agg.update_mark_price(&btc, 51000.0);
        assert_eq!(agg.get_position(Venue::Binance, &btc).unwrap().unrealized_pnl, 1000.0);
        assert_eq!(agg.get_position(Venue::Binance, &eth).unwrap().unrealized_pnl, 0.0);
    }

    #[test]
    fn reconcile_position_detects_and_reports_mismatch() {
        let agg = PositionAggregator::new();
        let symbol = SymbolId::new("BTCUSDT");
        agg.on_fill(Venue::Binance, &symbol, OrderSide::Buy, 1.0, 50000.0);

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_clone = seen.clone();
        agg.set_discrepancy_callback(Arc::new(move |d: &PositionDiscrepancy| {
            *seen_clone.lock() = Some(d.exchange_qty);
        }));

        let result = agg.reconcile_position(Venue::Binance, &symbol, 1.5, 0);
        assert!(result.is_some());
        assert_eq!(*seen.lock(), Some(1.5));

        let clean = agg.reconcile_position(Venue::Binance, &symbol, 1.0, 0);
        assert!(clean.is_none());
    }

    proptest! {
        #[test]
        fn quantity_tracks_sum_of_signed_fills(
            fills in proptest::collection::vec((any::<bool>(), 0.01f64..100.0, 1.0f64..100_000.0), 1..50),
        ) {
            let agg = PositionAggregator::new();
            let symbol = SymbolId::new("BTCUSDT");
            let mut expected = 0.0f64;
            let mut last = PositionState::flat();
            for (is_buy, qty, price) in fills {
                let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
                expected += if is_buy { qty } else { -qty };
                last = agg.on_fill(Venue::Binance, &symbol, side, qty, price);
            }
            prop_assert!((last.quantity - expected).abs() < 1e-6);
            prop_assert_eq!(last.avg_entry_price == 0.0, last.quantity.abs() <= ZERO_EPS);
        }
    }
}
