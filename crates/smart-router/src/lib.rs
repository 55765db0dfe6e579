//! [G] Smart Order Router: composite scoring, splitting, batch execution,
//! and per-venue execution-quality analytics over the [`coordinator`] façade
//! (`spec.md` §4.G).

mod batch;
mod quality;
mod router;
mod scoring;
mod splitting;
mod weights;

pub use batch::{BatchReport, CancelResult, ChildOutcome};
pub use quality::VenueQualitySnapshot;
pub use router::SmartOrderRouter;
pub use scoring::RoutingScore;
pub use splitting::OrderSplit;
pub use weights::{RoutingWeights, VenueFees, VenueLimits};
