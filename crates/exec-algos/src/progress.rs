//! Shared parent-algorithm state machine and progress snapshot
//! (`spec.md` §4.H).

use common::{OrderStatus, Venue};
use std::time::Duration;

/// Parent algorithm lifecycle: `Pending → Running → (Paused ↔ Running)* →
/// (Completed | Cancelled | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoState {
    /// Created, not yet started.
    Pending,
    /// Actively scheduling child slices.
    Running,
    /// Scheduling suspended; resumable.
    Paused,
    /// `filled_qty` reached `total_qty`. Terminal.
    Completed,
    /// Cancelled by the caller. Terminal.
    Cancelled,
    /// A child placement failed unrecoverably. Terminal.
    Failed,
}

impl AlgoState {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// A point-in-time read of a parent algorithm's execution progress.
#[derive(Debug, Clone, Copy)]
pub struct AlgoProgress {
    /// Quantity filled across all children so far.
    pub filled_qty: f64,
    /// Volume-weighted average fill price (`0.0` if nothing has filled yet).
    pub average_price: f64,
    /// `filled_qty / target_qty * 100`.
    pub progress_pct: f64,
    /// Count of child orders placed.
    pub child_orders_sent: u64,
    /// Count of child orders that reached `Filled`.
    pub child_orders_filled: u64,
    /// Time since `start()` was called.
    pub elapsed: Duration,
    /// `target_qty - filled_qty`.
    pub remaining: f64,
}

/// One child order a parent algorithm has placed.
#[derive(Debug, Clone)]
pub struct ChildSlice {
    /// Client order id.
    pub client_order_id: String,
    /// Venue the child was routed to.
    pub venue: Venue,
    /// Requested quantity for this slice.
    pub qty: f64,
    /// Limit price, if the slice used one.
    pub price: Option<f64>,
    /// Quantity filled so far for this slice.
    pub filled_qty: f64,
    /// Last known status.
    pub status: OrderStatus,
}
