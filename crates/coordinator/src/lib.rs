//! [F] Exchange Coordinator: the façade that owns adapters, aggregated
//! books, latency tracking, and positions, and exposes order routing
//! (`spec.md` §4.F, §6).

mod coordinator;
mod routing;

pub use coordinator::{ExchangeCoordinator, PositionSummary};
pub use routing::{RoutingConfig, RoutingDecision, RoutingStrategy};
