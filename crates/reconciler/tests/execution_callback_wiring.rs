//! Exercises the only reachable production composition between
//! `ExchangeCoordinator` and `AccountReconciler`: wiring
//! `AccountReconciler::execution_callback()` into
//! `ExchangeCoordinator::subscribe_executions`, paired with
//! `AccountReconciler::track_new_order` at the call site that places the
//! order. Neither crate depends on the other as a normal dependency, so
//! this can only be demonstrated from a composition root, which is what
//! this integration test stands in for.

use common::{OrderSide, OrderType, PlaceOrderRequest, SymbolId, TimeInForce, Venue};
use coordinator::ExchangeCoordinator;
use exchange_adapters::{Level, MockAdapter};
use market_data::LatencyTracker;
use positions::PositionAggregator;
use reconciler::{AccountReconciler, OrderStore, ReconcilerConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn fills_streamed_from_coordinator_populate_the_reconciler_order_store() {
    let positions = Arc::new(PositionAggregator::new());
    let coord = Arc::new(ExchangeCoordinator::new(
        Arc::new(LatencyTracker::new(16, Duration::from_secs(60))),
        Arc::clone(&positions),
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));

    let adapter = Arc::new(MockAdapter::new("binance"));
    adapter.set_immediate_fill(2.0, 101.0);
    coord.register_adapter(Venue::Binance, adapter);

    let symbol = SymbolId::new("BTCUSDT");
    let book = coord.get_or_create_book(&symbol);
    book.update_venue_bbo(
        Venue::Binance,
        Level { price: 100.0, qty: 5.0 },
        Level { price: 100.5, qty: 5.0 },
        0,
    );

    let order_store = Arc::new(OrderStore::new());
    let reconciler = Arc::new(AccountReconciler::new(Arc::clone(&order_store), positions, ReconcilerConfig::default()));
    coord.subscribe_executions(reconciler.execution_callback());

    let req = PlaceOrderRequest {
        symbol: symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        qty: 2.0,
        price: None,
        stop_price: None,
        client_order_id: "rc-1".to_string(),
        strategy_id: "integration".to_string(),
        reduce_only: false,
        post_only: false,
    };
    reconciler.track_new_order(Venue::Binance, symbol.clone(), req.client_order_id.clone(), req.strategy_id.clone());

    coord.place_order(&req, Some(Venue::Binance), 0).await.unwrap();

    let record = order_store.get(Venue::Binance, "rc-1").unwrap();
    assert_eq!(record.strategy_id, "integration");
    assert_eq!(record.filled_qty, 2.0);
    assert_eq!(record.avg_price, 101.0);
    assert_eq!(record.status, common::OrderStatus::Filled);
}
