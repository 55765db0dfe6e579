//! Order request/report vocabulary shared across the execution core.

use crate::venue::SymbolId;
use serde::{Deserialize, Serialize};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy / bid side.
    Buy,
    /// Sell / ask side.
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop-loss market order.
    StopLoss,
    /// Stop-loss limit order.
    StopLossLimit,
    /// Take-profit market order.
    TakeProfit,
    /// Take-profit limit order.
    TakeProfitLimit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Good till crossing (post-only).
    Gtx,
}

/// A request to place a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Canonical symbol.
    pub symbol: SymbolId,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Quantity, must be > 0.
    pub qty: f64,
    /// Limit price, required for Limit/StopLossLimit/TakeProfitLimit.
    pub price: Option<f64>,
    /// Stop trigger price, required for the Stop*/TakeProfit* types.
    pub stop_price: Option<f64>,
    /// Unique key within the process. Required, non-empty.
    pub client_order_id: String,
    /// Strategy that originated the order.
    pub strategy_id: String,
    /// Reduce-only flag.
    pub reduce_only: bool,
    /// Post-only flag.
    pub post_only: bool,
}

impl PlaceOrderRequest {
    /// Validate the request against the invariants in `spec.md` §3.
    ///
    /// # Errors
    /// Returns [`crate::CoreError::Validation`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> crate::CoreResult<()> {
        if self.client_order_id.is_empty() {
            return Err(crate::CoreError::Validation {
                reason: "client_order_id must be non-empty".to_string(),
            });
        }
        if !(self.qty > 0.0) {
            return Err(crate::CoreError::Validation {
                reason: "qty must be > 0".to_string(),
            });
        }
        let needs_price = matches!(
            self.order_type,
            OrderType::Limit | OrderType::StopLossLimit | OrderType::TakeProfitLimit
        );
        if needs_price && self.price.is_none() {
            return Err(crate::CoreError::Validation {
                reason: "price is required for this order type".to_string(),
            });
        }
        let needs_stop = matches!(
            self.order_type,
            OrderType::StopLoss
                | OrderType::StopLossLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
        );
        if needs_stop && self.stop_price.is_none() {
            return Err(crate::CoreError::Validation {
                reason: "stop_price is required for this order type".to_string(),
            });
        }
        Ok(())
    }
}

/// A request to cancel an existing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    /// Canonical symbol.
    pub symbol: SymbolId,
    /// Client order id of the order to cancel.
    pub client_order_id: String,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged.
    New,
    /// Acknowledged by the venue.
    Accepted,
    /// Partially filled.
    PartiallyFilled,
    /// Fully filled. Terminal.
    Filled,
    /// Cancelled. Terminal.
    Canceled,
    /// Rejected by the venue. Terminal.
    Rejected,
    /// Expired (e.g. IOC/FOK/GTX unmet). Terminal.
    Expired,
}

impl OrderStatus {
    /// Whether this status is terminal — no further transitions are valid.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Rank in the partial order `New ≺ Accepted ≺ PartiallyFilled ≺ terminal`
    /// used to reject regressing [`ExecutionReport`]s (`spec.md` §8 invariant 1).
    const fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Accepted => 1,
            Self::PartiallyFilled => 2,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired => 3,
        }
    }

    /// Whether `self` is a valid successor of `prior` (strictly forward, or a
    /// same-rank non-terminal repeat such as another `PartiallyFilled`).
    #[must_use]
    pub const fn can_follow(self, prior: Self) -> bool {
        if prior.is_terminal() {
            return false;
        }
        self.rank() >= prior.rank()
    }
}

/// A status/fill update observed from a venue.
///
/// Monotonic per `client_order_id`: once terminal, no further report with a
/// non-terminal status is accepted (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Canonical symbol.
    pub symbol: SymbolId,
    /// Client order id this report refers to.
    pub client_order_id: String,
    /// Venue-assigned order id, once known.
    pub venue_order_id: Option<String>,
    /// Resulting status.
    pub status: OrderStatus,
    /// Quantity filled by this report (0 if none).
    pub last_fill_qty: f64,
    /// Price of this report's fill (0 if none).
    pub last_fill_price: f64,
    /// Exchange-reported timestamp, nanoseconds.
    pub ts_exchange_ns: u64,
    /// Monotonic local receive timestamp, nanoseconds.
    pub ts_recv_ns: u64,
    /// Optional human-readable reason (rejects, expiries).
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn status_monotonicity() {
        assert!(OrderStatus::Accepted.can_follow(OrderStatus::New));
        assert!(OrderStatus::PartiallyFilled.can_follow(OrderStatus::Accepted));
        assert!(OrderStatus::Filled.can_follow(OrderStatus::PartiallyFilled));
        assert!(!OrderStatus::Accepted.can_follow(OrderStatus::PartiallyFilled));
        assert!(!OrderStatus::New.can_follow(OrderStatus::Filled));
        assert!(!OrderStatus::Filled.can_follow(OrderStatus::Canceled));
    }

    #[test]
    fn validate_rejects_zero_qty() {
        let req = PlaceOrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            qty: 0.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".to_string(),
            strategy_id: "s1".to_string(),
            reduce_only: false,
            post_only: false,
        };
        assert!(req.validate().is_err());
    }

    fn all_statuses() -> [OrderStatus; 7] {
        [
            OrderStatus::New,
            OrderStatus::Accepted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ]
    }

    fn status_strategy() -> impl Strategy<Value = OrderStatus> {
        prop_oneof![
            Just(OrderStatus::New),
            Just(OrderStatus::Accepted),
            Just(OrderStatus::PartiallyFilled),
            Just(OrderStatus::Filled),
            Just(OrderStatus::Canceled),
            Just(OrderStatus::Rejected),
            Just(OrderStatus::Expired),
        ]
    }

    proptest! {
        #[test]
        fn terminal_status_never_has_a_follower(prior in status_strategy(), next in status_strategy()) {
            if prior.is_terminal() {
                prop_assert!(!next.can_follow(prior));
            }
        }

        #[test]
        fn can_follow_agrees_with_rank_for_non_terminal_prior(prior in status_strategy(), next in status_strategy()) {
            if !prior.is_terminal() {
                prop_assert_eq!(next.can_follow(prior), next.rank() >= prior.rank());
            }
        }
    }

    #[test]
    fn every_status_can_follow_itself_unless_terminal() {
        for s in all_statuses() {
            assert_eq!(s.can_follow(s), !s.is_terminal());
        }
    }

    #[test]
    fn validate_requires_price_for_limit() {
        let req = PlaceOrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            qty: 1.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".to_string(),
            strategy_id: "s1".to_string(),
            reduce_only: false,
            post_only: false,
        };
        assert!(req.validate().is_err());
    }
}
