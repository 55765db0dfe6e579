//! End-to-end exercise of `ExchangeCoordinator::place_order` against a real
//! `ExchangeAdapter` implementation, covering the cross-crate wiring into
//! `LatencyTracker` and `PositionAggregator` that unit tests inside
//! `coordinator.rs` can't reach from outside the crate.

use common::{OrderSide, OrderType, PlaceOrderRequest, TimeInForce, Venue};
use coordinator::ExchangeCoordinator;
use exchange_adapters::{Level, MockAdapter};
use market_data::LatencyTracker;
use positions::PositionAggregator;
use std::sync::Arc;
use std::time::Duration;

fn place_request(client_order_id: &str, qty: f64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        symbol: common::SymbolId::new("BTCUSDT"),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        qty,
        price: None,
        stop_price: None,
        client_order_id: client_order_id.to_string(),
        strategy_id: "integration".to_string(),
        reduce_only: false,
        post_only: false,
    }
}

#[tokio::test]
async fn immediate_fill_updates_positions_and_latency_through_public_api() {
    let latency = Arc::new(LatencyTracker::new(16, Duration::from_secs(60)));
    let positions = Arc::new(PositionAggregator::new());
    let coord = ExchangeCoordinator::new(
        Arc::clone(&latency),
        Arc::clone(&positions),
        Duration::from_secs(1),
        Duration::from_secs(5),
    );

    let adapter = Arc::new(MockAdapter::new("binance"));
    adapter.set_immediate_fill(1.5, 25_000.0);
    coord.register_adapter(Venue::Binance, adapter);

    let symbol = common::SymbolId::new("BTCUSDT");
    let book = coord.get_or_create_book(&symbol);
    book.update_venue_bbo(
        Venue::Binance,
        Level { price: 24_990.0, qty: 5.0 },
        Level { price: 25_010.0, qty: 5.0 },
        0,
    );

    let report = coord
        .place_order(&place_request("wire-1", 1.5), Some(Venue::Binance), 0)
        .await
        .unwrap();
    assert_eq!(report.last_fill_qty, 1.5);

    let position = coord.get_position(&symbol);
    assert_eq!(position.quantity, 1.5);

    assert!(coord.latency_stats(Venue::Binance, 0).is_some());
}

#[tokio::test]
async fn non_filling_order_still_records_latency_without_moving_position() {
    let latency = Arc::new(LatencyTracker::new(16, Duration::from_secs(60)));
    let positions = Arc::new(PositionAggregator::new());
    let coord = ExchangeCoordinator::new(latency, positions, Duration::from_secs(1), Duration::from_secs(5));

    let adapter = Arc::new(MockAdapter::new("okx"));
    coord.register_adapter(Venue::Okx, adapter);

    let symbol = common::SymbolId::new("ETHUSDT");
    let book = coord.get_or_create_book(&symbol);
    book.update_venue_bbo(
        Venue::Okx,
        Level { price: 1_800.0, qty: 5.0 },
        Level { price: 1_801.0, qty: 5.0 },
        0,
    );

    coord
        .place_order(&place_request("wire-2", 1.0), Some(Venue::Okx), 0)
        .await
        .unwrap();

    assert_eq!(coord.get_position(&symbol).quantity, 0.0);
    assert!(coord.latency_stats(Venue::Okx, 0).is_some());
}
