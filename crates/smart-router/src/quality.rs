//! Per-venue reliability tracking and execution-quality analytics
//! (`spec.md` §4.G).

use common::Venue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rolling execution-quality aggregate for one venue.
#[derive(Debug, Default)]
struct VenueQualityAccum {
    slippage_sum: f64,
    requested_qty_sum: f64,
    filled_qty_sum: f64,
    execution_time_sum_ns: u64,
    fee_paid_sum: f64,
    sample_count: u64,
}

/// Point-in-time read of a venue's rolling execution quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct VenueQualitySnapshot {
    /// Average (expected − fill) price, signed so positive means favorable.
    pub avg_slippage: f64,
    /// `filled_qty_sum / requested_qty_sum` across every recorded execution.
    pub fill_rate: f64,
    /// Average execution time, nanoseconds.
    pub avg_execution_time_ns: u64,
    /// Cumulative fees paid at this venue.
    pub total_fee_paid: f64,
    /// Number of executions folded into this snapshot.
    pub sample_count: u64,
}

/// Tracks [`VenueQualitySnapshot`] and success/failure counters per venue.
pub struct VenueQualityTracker {
    quality: DashMap<Venue, VenueQualityAccum>,
    successes: DashMap<Venue, AtomicU64>,
    failures: DashMap<Venue, AtomicU64>,
}

impl Default for VenueQualityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VenueQualityTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            quality: DashMap::new(),
            successes: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Fold one completed execution into `venue`'s rolling analytics.
    pub fn record_execution(
        &self,
        venue: Venue,
        expected_price: f64,
        fill_price: f64,
        requested_qty: f64,
        filled_qty: f64,
        execution_time_ns: u64,
        fee_paid: f64,
    ) {
        let mut entry = self.quality.entry(venue).or_default();
        entry.slippage_sum += expected_price - fill_price;
        entry.requested_qty_sum += requested_qty;
        entry.filled_qty_sum += filled_qty;
        entry.execution_time_sum_ns += execution_time_ns;
        entry.fee_paid_sum += fee_paid;
        entry.sample_count += 1;
    }

    /// Current rolling snapshot for `venue`, `None` if never recorded.
    #[must_use]
    pub fn snapshot(&self, venue: Venue) -> Option<VenueQualitySnapshot> {
        let entry = self.quality.get(&venue)?;
        if entry.sample_count == 0 {
            return None;
        }
        let n = entry.sample_count as f64;
        Some(VenueQualitySnapshot {
            avg_slippage: entry.slippage_sum / n,
            fill_rate: if entry.requested_qty_sum > 0.0 {
                entry.filled_qty_sum / entry.requested_qty_sum
            } else {
                0.0
            },
            avg_execution_time_ns: entry.execution_time_sum_ns / entry.sample_count,
            total_fee_paid: entry.fee_paid_sum,
            sample_count: entry.sample_count,
        })
    }

    /// Record a successful child placement for reliability scoring.
    pub fn record_success(&self, venue: Venue) {
        self.successes.entry(venue).or_default().fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed child placement for reliability scoring.
    pub fn record_failure(&self, venue: Venue) {
        self.failures.entry(venue).or_default().fetch_add(1, Ordering::Relaxed);
    }

    /// Reliability score with a Bayesian prior of one success and one
    /// failure, so an untested venue scores `0.5` rather than `0.0`.
    #[must_use]
    pub fn reliability_score(&self, venue: Venue) -> f64 {
        let success = self.successes.get(&venue).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0) as f64;
        let failure = self.failures.get(&venue).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0) as f64;
        (success + 1.0) / (success + failure + 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untested_venue_has_neutral_reliability() {
        let tracker = VenueQualityTracker::new();
        assert_eq!(tracker.reliability_score(Venue::Binance), 0.5);
    }

    #[test]
    fn reliability_improves_with_successes() {
        let tracker = VenueQualityTracker::new();
        for _ in 0..9 {
            tracker.record_success(Venue::Binance);
        }
        tracker.record_failure(Venue::Binance);
        assert!(tracker.reliability_score(Venue::Binance) > 0.8);
    }

    #[test]
    fn quality_snapshot_averages_across_executions() {
        let tracker = VenueQualityTracker::new();
        tracker.record_execution(Venue::Okx, 100.0, 99.5, 10.0, 10.0, 50_000_000, 0.1);
        tracker.record_execution(Venue::Okx, 100.0, 100.5, 10.0, 8.0, 70_000_000, 0.1);
        let snap = tracker.snapshot(Venue::Okx).unwrap();
        assert_eq!(snap.sample_count, 2);
        assert!((snap.avg_slippage - (-0.25)).abs() < 1e-9);
        assert!((snap.fill_rate - 0.9).abs() < 1e-9);
        assert_eq!(snap.avg_execution_time_ns, 60_000_000);
    }
}
