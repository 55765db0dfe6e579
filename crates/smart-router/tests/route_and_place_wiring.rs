//! End-to-end exercise of `SmartOrderRouter::route_and_place` against a real
//! adapter, covering the execution-quality wiring that unit tests inside
//! `router.rs` can't reach from outside the crate.

use common::{OrderSide, OrderType, PlaceOrderRequest, SymbolId, TimeInForce, Venue};
use coordinator::ExchangeCoordinator;
use exchange_adapters::{Level, MockAdapter};
use market_data::LatencyTracker;
use positions::PositionAggregator;
use smart_router::{SmartOrderRouter, VenueFees};
use std::sync::Arc;
use std::time::Duration;

fn router_with_binance(symbol: &SymbolId, adapter: Arc<MockAdapter>) -> SmartOrderRouter {
    let coord = Arc::new(ExchangeCoordinator::new(
        Arc::new(LatencyTracker::new(16, Duration::from_secs(60))),
        Arc::new(PositionAggregator::new()),
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));
    coord.register_adapter(Venue::Binance, adapter);
    let book = coord.get_or_create_book(symbol);
    book.update_venue_bbo(
        Venue::Binance,
        Level { price: 100.0, qty: 5.0 },
        Level { price: 100.5, qty: 5.0 },
        0,
    );
    SmartOrderRouter::new(coord)
}

#[tokio::test]
async fn route_and_place_records_quality_from_a_real_fill() {
    let symbol = SymbolId::new("BTCUSDT");
    let adapter = Arc::new(MockAdapter::new("binance"));
    adapter.set_immediate_fill(1.0, 100.6);
    let router = router_with_binance(&symbol, adapter);
    router.set_venue_fees(Venue::Binance, VenueFees { maker_fee: 0.0002, taker_fee: 0.0004 });

    let req = PlaceOrderRequest {
        symbol: symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        qty: 1.0,
        price: None,
        stop_price: None,
        client_order_id: "rt-1".to_string(),
        strategy_id: "integration".to_string(),
        reduce_only: false,
        post_only: false,
    };

    assert!(router.get_venue_quality(Venue::Binance).is_none());

    let (venue, report) = router.route_and_place(&req, 0).await.unwrap();
    assert_eq!(venue, Venue::Binance);
    assert_eq!(report.status, common::OrderStatus::Filled);

    let quality = router.get_venue_quality(Venue::Binance).unwrap();
    assert_eq!(quality.sample_count, 1);
    assert!(quality.total_fee_paid > 0.0);
}

#[tokio::test]
async fn route_and_place_with_no_fill_does_not_record_quality() {
    let symbol = SymbolId::new("ETHUSDT");
    let adapter = Arc::new(MockAdapter::new("binance"));
    let router = router_with_binance(&symbol, adapter);

    let req = PlaceOrderRequest {
        symbol: symbol.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        qty: 1.0,
        price: None,
        stop_price: None,
        client_order_id: "rt-2".to_string(),
        strategy_id: "integration".to_string(),
        reduce_only: false,
        post_only: false,
    };

    let (venue, report) = router.route_and_place(&req, 0).await.unwrap();
    assert_eq!(venue, Venue::Binance);
    assert_eq!(report.status, common::OrderStatus::Accepted);
    assert!(router.get_venue_quality(Venue::Binance).is_none());
}
