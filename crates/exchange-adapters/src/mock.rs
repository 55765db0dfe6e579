//! A deterministic, in-memory [`ExchangeAdapter`] used by tests throughout
//! the workspace (coordinator/router/reconciler) so they can exercise
//! routing and reconciliation logic without network access — in the spirit
//! of the teacher's simulated `send_to_binance_connector`.

use crate::adapter::{Balance, ExchangeAdapter, OrderBookSnapshot, Trade};
use async_trait::async_trait;
use common::{
    now_ns, CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderStatus,
    PlaceOrderRequest, SymbolId,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct MockOrder {
    report: ExecutionReport,
}

/// A fully in-memory exchange: acknowledges every order immediately and
/// never fills it unless the test calls [`MockAdapter::inject_fill`].
pub struct MockAdapter {
    name: String,
    connected: AtomicBool,
    orders: Mutex<FxHashMap<String, MockOrder>>,
    /// If set, every call fails with this error (for resilience testing).
    pub fail_with: Mutex<Option<CoreError>>,
    venue_order_seq: Mutex<u64>,
    /// If set, the next [`ExchangeAdapter::place_order`] call returns a
    /// `Filled` report at this (qty, price) instead of `Accepted`/0, as if
    /// the order matched immediately against resting liquidity.
    immediate_fill: Mutex<Option<(f64, f64)>>,
}

impl MockAdapter {
    /// Create a mock adapter with the given display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            orders: Mutex::new(FxHashMap::default()),
            fail_with: Mutex::new(None),
            venue_order_seq: Mutex::new(0),
            immediate_fill: Mutex::new(None),
        }
    }

    /// Make the next [`ExchangeAdapter::place_order`] call return an
    /// immediate `Filled` report at `(qty, price)`, simulating a marketable
    /// order matching at placement time.
    pub fn set_immediate_fill(&self, qty: f64, price: f64) {
        *self.immediate_fill.lock() = Some((qty, price));
    }

    /// Register an order as already accepted at the venue without it having
    /// gone through [`ExchangeAdapter::place_order`] — used to simulate
    /// orphans for the Reconciler (`spec.md` §8 S4).
    pub fn seed_open_order(&self, symbol: &SymbolId, client_order_id: &str, qty: f64, price: f64) {
        let report = ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some(format!("V{client_order_id}")),
            status: OrderStatus::Accepted,
            last_fill_qty: 0.0,
            last_fill_price: price,
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        };
        let _ = qty;
        self.orders
            .lock()
            .insert(client_order_id.to_string(), MockOrder { report });
    }

    /// Apply a fill to a previously-placed order.
    pub fn inject_fill(&self, client_order_id: &str, qty: f64, price: f64, status: OrderStatus) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(client_order_id) {
            order.report.status = status;
            order.report.last_fill_qty = qty;
            order.report.last_fill_price = price;
            order.report.ts_exchange_ns = now_ns();
            order.report.ts_recv_ns = now_ns();
        }
    }

    fn maybe_fail(&self) -> CoreResult<()> {
        if let Some(err) = self.fail_with.lock().as_ref() {
            return Err(clone_core_error(err));
        }
        Ok(())
    }
}

fn clone_core_error(err: &CoreError) -> CoreError {
    match err {
        CoreError::Network { reason } => CoreError::Network {
            reason: reason.clone(),
        },
        CoreError::RateLimited { retry_after_ms } => CoreError::RateLimited {
            retry_after_ms: *retry_after_ms,
        },
        CoreError::Authentication => CoreError::Authentication,
        CoreError::Validation { reason } => CoreError::Validation {
            reason: reason.clone(),
        },
        CoreError::VenueReject { reason } => CoreError::VenueReject {
            reason: reason.clone(),
        },
        CoreError::CircuitOpen => CoreError::CircuitOpen,
        CoreError::State { reason } => CoreError::State {
            reason: reason.clone(),
        },
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "mock-1.0"
    }

    async fn connect(&self) -> CoreResult<()> {
        self.maybe_fail()?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> CoreResult<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn place_order(&self, req: &PlaceOrderRequest) -> CoreResult<ExecutionReport> {
        self.maybe_fail()?;
        let venue_order_id = {
            let mut seq = self.venue_order_seq.lock();
            *seq += 1;
            format!("{}-{}", self.name, seq)
        };
        let fill = self.immediate_fill.lock().take();
        let report = ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(venue_order_id),
            status: if fill.is_some() { OrderStatus::Filled } else { OrderStatus::Accepted },
            last_fill_qty: fill.map(|(qty, _)| qty).unwrap_or(0.0),
            last_fill_price: fill.map(|(_, price)| price).unwrap_or(0.0),
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        };
        self.orders.lock().insert(
            req.client_order_id.clone(),
            MockOrder {
                report: report.clone(),
            },
        );
        Ok(report)
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        self.maybe_fail()?;
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&req.client_order_id)
            .ok_or_else(|| CoreError::Validation {
                reason: format!("unknown client_order_id {}", req.client_order_id),
            })?;
        order.report.status = OrderStatus::Canceled;
        order.report.ts_recv_ns = now_ns();
        Ok(order.report.clone())
    }

    async fn cancel_order_by_id(
        &self,
        _symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.maybe_fail()?;
        let mut orders = self.orders.lock();
        let order = orders
            .values_mut()
            .find(|o| o.report.venue_order_id.as_deref() == Some(venue_order_id))
            .ok_or_else(|| CoreError::Validation {
                reason: format!("unknown venue_order_id {venue_order_id}"),
            })?;
        order.report.status = OrderStatus::Canceled;
        order.report.ts_recv_ns = now_ns();
        Ok(order.report.clone())
    }

    async fn get_order(
        &self,
        _symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.maybe_fail()?;
        self.orders
            .lock()
            .get(client_order_id)
            .map(|o| o.report.clone())
            .ok_or_else(|| CoreError::Validation {
                reason: format!("unknown client_order_id {client_order_id}"),
            })
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        self.maybe_fail()?;
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| &o.report.symbol == symbol && !o.report.status.is_terminal())
            .map(|o| o.report.clone())
            .collect())
    }

    async fn query_orders_in_window(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>> {
        self.maybe_fail()?;
        let start_ns = start_ms * 1_000_000;
        let end_ns = end_ms * 1_000_000;
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| {
                &o.report.symbol == symbol
                    && o.report.ts_exchange_ns >= start_ns
                    && o.report.ts_exchange_ns <= end_ns
            })
            .map(|o| o.report.clone())
            .collect())
    }

    async fn get_current_price(&self, _symbol: &SymbolId) -> CoreResult<f64> {
        self.maybe_fail()?;
        Ok(0.0)
    }

    async fn get_order_book(&self, _symbol: &SymbolId, _depth: usize) -> CoreResult<OrderBookSnapshot> {
        self.maybe_fail()?;
        Ok(OrderBookSnapshot {
            bids: vec![],
            asks: vec![],
            ts_exchange_ns: now_ns(),
        })
    }

    async fn get_recent_trades(&self, _symbol: &SymbolId, _limit: usize) -> CoreResult<Vec<Trade>> {
        self.maybe_fail()?;
        Ok(vec![])
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        self.maybe_fail()?;
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderSide, OrderType, TimeInForce};

    #[tokio::test]
    async fn place_then_cancel_round_trip() {
        let adapter = MockAdapter::new("binance");
        let req = PlaceOrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
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
        let placed = adapter.place_order(&req).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Accepted);

        let cancelled = adapter
            .cancel_order(&CancelOrderRequest {
                symbol: SymbolId::new("BTCUSDT"),
                client_order_id: "c1".into(),
            })
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn set_immediate_fill_applies_to_next_place_order_only() {
        let adapter = MockAdapter::new("binance");
        adapter.set_immediate_fill(2.0, 101.0);
        let req = PlaceOrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            qty: 2.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".into(),
            strategy_id: "s1".into(),
            reduce_only: false,
            post_only: false,
        };
        let filled = adapter.place_order(&req).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.last_fill_qty, 2.0);
        assert_eq!(filled.last_fill_price, 101.0);

        let req2 = PlaceOrderRequest {
            client_order_id: "c2".into(),
            ..req
        };
        let second = adapter.place_order(&req2).await.unwrap();
        assert_eq!(second.status, OrderStatus::Accepted);
        assert_eq!(second.last_fill_qty, 0.0);
    }
}
