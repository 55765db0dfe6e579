//! Shared types for the multi-venue execution core.
//!
//! Every crate in the workspace depends on this one for the order/report
//! vocabulary and the error taxonomy so that a `Venue` or an `OrderStatus`
//! means exactly the same thing everywhere it is used.

pub mod error;
pub mod ids;
pub mod order;
pub mod time;
pub mod venue;

pub use error::{CoreError, CoreResult};
pub use ids::ClientOrderIdGenerator;
pub use order::{
    CancelOrderRequest, ExecutionReport, OrderSide, OrderStatus, OrderType, PlaceOrderRequest,
    TimeInForce,
};
pub use time::now_ns;
pub use venue::{SymbolId, Venue};

/// Tolerance used for quantity-equality comparisons (`spec.md` §9).
pub const QTY_EPS: f64 = 1e-8;
/// Tolerance used for zero-detection comparisons (`spec.md` §9).
pub const ZERO_EPS: f64 = 1e-10;
