//! The reconciler's own view of local order state, built up from the
//! execution reports the core observes (`spec.md` §4.J).
//!
//! Every adapter's `get_order`/`query_open_orders` reports the snapshot
//! state of an order using [`common::ExecutionReport`]'s `last_fill_qty` /
//! `last_fill_price` fields to mean "cumulative filled quantity" and "most
//! recent fill price" respectively — the same wire type the streaming path
//! uses for per-event deltas. The local store mirrors that convention: it
//! accumulates deltas from the stream into a running `filled_qty` /
//! volume-weighted `avg_price`, so the two sides compare like for like.

use common::{ExecutionReport, OrderStatus, SymbolId, Venue};
use dashmap::DashMap;

/// The reconciler's local record of one order's state.
#[derive(Debug, Clone)]
pub struct LocalOrderRecord {
    /// Venue the order was routed to.
    pub venue: Venue,
    /// Symbol.
    pub symbol: SymbolId,
    /// Strategy that originated the order, for freeze bookkeeping.
    pub strategy_id: String,
    /// Last known status.
    pub status: OrderStatus,
    /// Cumulative filled quantity, accumulated from streamed fills.
    pub filled_qty: f64,
    /// Volume-weighted average fill price, accumulated from streamed fills.
    pub avg_price: f64,
}

/// Keyed by `(venue, client_order_id)`.
type OrderKey = (Venue, String);

/// The reconciler's local order book, fed by the execution stream.
#[derive(Default)]
pub struct OrderStore {
    records: DashMap<OrderKey, LocalOrderRecord>,
}

impl OrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new order the core just placed, before any fills arrive.
    pub fn track_new_order(&self, venue: Venue, symbol: SymbolId, client_order_id: String, strategy_id: String) {
        self.records.entry((venue, client_order_id)).or_insert(LocalOrderRecord {
            venue,
            symbol,
            strategy_id,
            status: OrderStatus::New,
            filled_qty: 0.0,
            avg_price: 0.0,
        });
    }

    /// Fold one streamed execution report into the local record.
    pub fn apply_report(&self, venue: Venue, report: &ExecutionReport) {
        let mut entry = self.records.entry((venue, report.client_order_id.clone())).or_insert(LocalOrderRecord {
            venue,
            symbol: report.symbol.clone(),
            strategy_id: String::new(),
            status: report.status,
            filled_qty: 0.0,
            avg_price: 0.0,
        });
        if report.last_fill_qty > 0.0 {
            let new_filled = entry.filled_qty + report.last_fill_qty;
            entry.avg_price = (entry.avg_price * entry.filled_qty + report.last_fill_price * report.last_fill_qty) / new_filled;
            entry.filled_qty = new_filled;
        }
        entry.status = report.status;
    }

    /// The local record for `(venue, client_order_id)`, if tracked.
    #[must_use]
    pub fn get(&self, venue: Venue, client_order_id: &str) -> Option<LocalOrderRecord> {
        self.records.get(&(venue, client_order_id.to_string())).map(|e| e.clone())
    }

    /// Every locally-tracked order for `venue`.
    #[must_use]
    pub fn open_orders_for_venue(&self, venue: Venue) -> Vec<(String, LocalOrderRecord)> {
        self.records
            .iter()
            .filter(|e| e.key().0 == venue)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }

    /// Whether `strategy_id` owns at least one locally-tracked order.
    #[must_use]
    pub fn strategies_with_orders(&self) -> Vec<String> {
        let mut out: Vec<String> = self.records.iter().map(|e| e.value().strategy_id.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::now_ns;

    fn report(client_order_id: &str, status: OrderStatus, qty: f64, price: f64) -> ExecutionReport {
        ExecutionReport {
            symbol: SymbolId::new("BTCUSDT"),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some("v1".into()),
            status,
            last_fill_qty: qty,
            last_fill_price: price,
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        }
    }

    #[test]
    fn fills_accumulate_into_volume_weighted_average() {
        let store = OrderStore::new();
        store.apply_report(Venue::Binance, &report("c1", OrderStatus::PartiallyFilled, 1.0, 100.0));
        store.apply_report(Venue::Binance, &report("c1", OrderStatus::Filled, 1.0, 102.0));
        let record = store.get(Venue::Binance, "c1").unwrap();
        assert_eq!(record.filled_qty, 2.0);
        assert_eq!(record.avg_price, 101.0);
        assert_eq!(record.status, OrderStatus::Filled);
    }
}
