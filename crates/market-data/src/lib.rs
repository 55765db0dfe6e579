//! [C]/[D] Market data aggregation: cross-venue order books and per-venue
//! latency tracking.

pub mod book;
pub mod latency;

pub use book::{AggregatedBbo, AggregatedLevel, AggregatedOrderBook, VenueStatus};
pub use latency::{LatencyStats, LatencyTracker};
