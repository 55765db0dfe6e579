//! [D] Latency tracker: a bounded sliding window of round-trip samples per
//! venue (`spec.md` §4.D).

use common::Venue;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Sample {
    ts_ns: u64,
    latency: Duration,
}

struct VenueWindow {
    samples: VecDeque<Sample>,
}

/// Per-venue p50/p99 snapshot.
#[derive(Debug, Clone, Copy)]
pub struct LatencyStats {
    /// Median latency over the retained window.
    pub p50: Duration,
    /// 99th percentile latency over the retained window.
    pub p99: Duration,
    /// Number of retained samples.
    pub sample_count: usize,
    /// Timestamp of the most recent sample, nanoseconds.
    pub last_sample_ns: u64,
}

/// Tracks round-trip latency per venue in a bounded sliding window
/// (`spec.md` §4.D, invariant 4).
pub struct LatencyTracker {
    window_size: usize,
    window_duration: Duration,
    venues: RwLock<HashMap<Venue, VenueWindow>>,
}

impl LatencyTracker {
    /// Create a tracker retaining at most `window_size` samples per venue,
    /// none older than `window_duration`.
    #[must_use]
    pub fn new(window_size: usize, window_duration: Duration) -> Self {
        Self {
            window_size,
            window_duration,
            venues: RwLock::new(HashMap::new()),
        }
    }

    /// Record one latency sample for `venue` observed at `ts_ns`.
    pub fn record_latency(&self, venue: Venue, latency: Duration, ts_ns: u64) {
        let mut venues = self.venues.write();
        let window = venues.entry(venue).or_insert_with(|| VenueWindow {
            samples: VecDeque::new(),
        });
        window.samples.push_back(Sample { ts_ns, latency });
        while window.samples.len() > self.window_size {
            window.samples.pop_front();
        }
        self.evict_expired(window, ts_ns);
    }

    fn evict_expired(&self, window: &mut VenueWindow, now_ns: u64) {
        let max_age_ns = self.window_duration.as_nanos() as u64;
        while let Some(front) = window.samples.front() {
            if now_ns.saturating_sub(front.ts_ns) > max_age_ns {
                window.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn stats_locked(window: &VenueWindow) -> Option<LatencyStats> {
        if window.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = window.samples.iter().map(|s| s.latency).collect();
        sorted.sort();
        let p50_idx = (sorted.len().saturating_sub(1)) / 2;
        let p99_idx = ((sorted.len() as f64) * 0.99).floor() as usize;
        let p99_idx = p99_idx.min(sorted.len() - 1);
        Some(LatencyStats {
            p50: sorted[p50_idx],
            p99: sorted[p99_idx],
            sample_count: sorted.len(),
            last_sample_ns: window.samples.back().map(|s| s.ts_ns).unwrap_or(0),
        })
    }

    /// Current statistics for `venue`, evicting expired samples against
    /// `now_ns` first. `None` if the venue has no retained samples.
    #[must_use]
    pub fn get_stats(&self, venue: Venue, now_ns: u64) -> Option<LatencyStats> {
        let mut venues = self.venues.write();
        let window = venues.get_mut(&venue)?;
        self.evict_expired(window, now_ns);
        Self::stats_locked(window)
    }

    /// Venues ordered by ascending p50; venues with zero retained samples
    /// sort last, in no particular order among themselves.
    #[must_use]
    pub fn get_venues_by_latency(&self, now_ns: u64) -> Vec<(Venue, Option<LatencyStats>)> {
        let mut venues = self.venues.write();
        let mut out: Vec<(Venue, Option<LatencyStats>)> = venues
            .iter_mut()
            .map(|(venue, window)| {
                self.evict_expired(window, now_ns);
                (*venue, Self::stats_locked(window))
            })
            .collect();
        out.sort_by(|a, b| match (a.1, b.1) {
            (Some(sa), Some(sb)) => sa.p50.cmp(&sb.p50),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        out
    }

    /// Whether `venue` is healthy: p50 ≤ `max_latency` and its last sample is
    /// no older than `max_staleness`. A venue with no samples is unhealthy.
    #[must_use]
    pub fn is_healthy(&self, venue: Venue, now_ns: u64, max_latency: Duration, max_staleness: Duration) -> bool {
        let Some(stats) = self.get_stats(venue, now_ns) else {
            return false;
        };
        stats.p50 <= max_latency && now_ns.saturating_sub(stats.last_sample_ns) <= max_staleness.as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn window_never_exceeds_configured_size() {
        let tracker = LatencyTracker::new(3, Duration::from_secs(60));
        for i in 0..10 {
            tracker.record_latency(Venue::Binance, Duration::from_millis(i), i * 1_000_000_000);
        }
        let stats = tracker.get_stats(Venue::Binance, 10 * 1_000_000_000).unwrap();
        assert_eq!(stats.sample_count, 3);
    }

    #[test]
    fn samples_older_than_window_duration_are_evicted() {
        let tracker = LatencyTracker::new(100, Duration::from_millis(50));
        tracker.record_latency(Venue::Binance, Duration::from_millis(5), 0);
        tracker.record_latency(Venue::Binance, Duration::from_millis(5), 100_000_000);
        let stats = tracker.get_stats(Venue::Binance, 100_000_000).unwrap();
        assert_eq!(stats.sample_count, 1);
    }

    #[test]
    fn venues_sorted_ascending_by_p50_with_empty_last() {
        let tracker = LatencyTracker::new(10, Duration::from_secs(60));
        tracker.record_latency(Venue::Binance, Duration::from_millis(20), 0);
        tracker.record_latency(Venue::Okx, Duration::from_millis(5), 0);
        tracker.record_latency(Venue::Bybit, Duration::from_millis(5), 0);
        // Bybit registered but never sampled again; Coinbase has zero samples via empty lookup.
        let ordered = tracker.get_venues_by_latency(0);
        let venues: Vec<Venue> = ordered.iter().map(|(v, _)| *v).collect();
        assert_eq!(venues[0], Venue::Okx);
        assert_eq!(venues[1], Venue::Bybit);
        assert_eq!(venues[2], Venue::Binance);
    }

    #[test]
    fn healthy_requires_both_latency_and_freshness() {
        let tracker = LatencyTracker::new(10, Duration::from_secs(60));
        tracker.record_latency(Venue::Binance, Duration::from_millis(10), 0);
        assert!(tracker.is_healthy(Venue::Binance, 0, Duration::from_millis(50), Duration::from_secs(1)));
        assert!(!tracker.is_healthy(Venue::Binance, 0, Duration::from_millis(5), Duration::from_secs(1)));
        assert!(!tracker.is_healthy(
            Venue::Binance,
            10_000_000_000,
            Duration::from_millis(50),
            Duration::from_secs(1)
        ));
    }

    #[test]
    fn venue_with_no_samples_is_unhealthy() {
        let tracker = LatencyTracker::new(10, Duration::from_secs(60));
        assert!(!tracker.is_healthy(Venue::Binance, 0, Duration::from_secs(1), Duration::from_secs(1)));
    }

    proptest! {
        #[test]
        fn window_size_bound_holds_for_any_sample_sequence(
            window_size in 1usize..20,
            sample_millis in prop::collection::vec(0u64..1000, 0..200),
        ) {
            let tracker = LatencyTracker::new(window_size, Duration::from_secs(3600));
            let mut now = 0u64;
            for ms in &sample_millis {
                tracker.record_latency(Venue::Binance, Duration::from_millis(*ms), now);
                now += 1_000_000;
            }
            if let Some(stats) = tracker.get_stats(Venue::Binance, now) {
                prop_assert!(stats.sample_count <= window_size);
                prop_assert!(stats.p50 <= stats.p99);
            }
        }
    }
}
