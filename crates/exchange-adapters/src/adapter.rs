//! [A] The `ExchangeAdapter` capability trait and the small value types its
//! methods exchange.
//!
//! All order-flow operations are asynchronous (`spec.md` §4.A); the trait is
//! `async_trait` + `Send + Sync` so the Coordinator can hold it as
//! `Arc<dyn ExchangeAdapter>` uniformly across venues (`spec.md` §9).

use async_trait::async_trait;
use common::{CancelOrderRequest, CoreResult, ExecutionReport, PlaceOrderRequest, SymbolId};
use serde::{Deserialize, Serialize};

/// One price level of a depth snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Level {
    /// Price.
    pub price: f64,
    /// Quantity available at this price.
    pub qty: f64,
}

/// A depth-of-book snapshot for one venue/symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Bids, best (highest) first.
    pub bids: Vec<Level>,
    /// Asks, best (lowest) first.
    pub asks: Vec<Level>,
    /// Exchange-reported timestamp, nanoseconds.
    pub ts_exchange_ns: u64,
}

/// A public trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Price.
    pub price: f64,
    /// Quantity.
    pub qty: f64,
    /// Exchange-reported timestamp, nanoseconds.
    pub ts_exchange_ns: u64,
    /// True if the taker was a buyer.
    pub buyer_taker: bool,
}

/// A single-asset account balance line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Asset symbol (e.g. `"USDT"`).
    pub asset: String,
    /// Free (available) balance.
    pub free: f64,
    /// Balance locked in open orders.
    pub locked: f64,
}

/// The capability set every venue-specific client exposes (`spec.md` §4.A).
///
/// Implementors never log secret material and never leak it through an
/// error message, including via `Debug`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Adapter name, e.g. `"binance"`.
    fn name(&self) -> &str;
    /// Adapter implementation version string.
    fn version(&self) -> &str;

    /// Establish the venue connection (REST auth probe / WS handshake).
    async fn connect(&self) -> CoreResult<()>;
    /// Tear down the venue connection.
    async fn disconnect(&self) -> CoreResult<()>;
    /// Whether the adapter currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Place a new order.
    async fn place_order(&self, req: &PlaceOrderRequest) -> CoreResult<ExecutionReport>;
    /// Cancel an order by the client-assigned id.
    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport>;
    /// Cancel an order by the venue-assigned id (reconciliation variant).
    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport>;
    /// Fetch the current state of one order.
    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport>;
    /// Every currently-open order for `symbol`.
    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>>;
    /// Every order for `symbol` whose exchange timestamp falls in
    /// `[start_ms, end_ms]`.
    async fn query_orders_in_window(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>>;

    /// Last traded price.
    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64>;
    /// Top-`depth` levels of the order book.
    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot>;
    /// Most recent public trades, newest last.
    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>>;
    /// Account balances.
    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>>;

    /// Synchronous best-effort price read. Returns `None` rather than
    /// blocking indefinitely when a result isn't immediately available —
    /// callers that need a guaranteed answer must use [`Self::get_current_price`]
    /// (`spec.md` §4.A).
    fn try_get_current_price(&self) -> Option<f64> {
        None
    }
}

/// Narrow capability the Account Reconciler depends on: query + cancel, never
/// `place_order`. Every [`ExchangeAdapter`] satisfies it for free via the
/// blanket impl below, but holding `Arc<dyn ReconciliationQueryInterface>`
/// instead of `Arc<dyn ExchangeAdapter>` makes the "reconciler cannot place
/// orders" rule from `spec.md` §3/§9 a type-level guarantee rather than a
/// convention.
#[async_trait]
pub trait ReconciliationQueryInterface: Send + Sync {
    /// See [`ExchangeAdapter::query_open_orders`].
    async fn query_open_orders_async(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>>;
    /// See [`ExchangeAdapter::get_order`].
    async fn query_order_async(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport>;
    /// See [`ExchangeAdapter::query_orders_in_window`].
    async fn query_orders_async(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>>;
    /// See [`ExchangeAdapter::cancel_order_by_id`].
    async fn cancel_order_async(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport>;
}

#[async_trait]
impl<T: ExchangeAdapter + ?Sized> ReconciliationQueryInterface for T {
    async fn query_open_orders_async(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        self.query_open_orders(symbol).await
    }

    async fn query_order_async(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.get_order(symbol, client_order_id).await
    }

    async fn query_orders_async(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>> {
        self.query_orders_in_window(symbol, start_ms, end_ms).await
    }

    async fn cancel_order_async(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.cancel_order_by_id(symbol, venue_order_id).await
    }
}
