//! Monotonic receive-time helper.
//!
//! Adapters stamp `ts_recv_ns` from this clock, never from wall-clock time,
//! so latency samples are immune to clock adjustments (`spec.md` §4.A).

use std::time::Instant;

static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Nanoseconds since an arbitrary, process-local epoch.
///
/// Only differences between two calls are meaningful; the absolute value
/// carries no wall-clock meaning.
#[must_use]
pub fn now_ns() -> u64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}
