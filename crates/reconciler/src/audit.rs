//! Bounded circular audit trail of reconciliation events (`spec.md` §4.J).

use crate::mismatch::{Mismatch, MismatchSeverity};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default capacity of the audit trail ring buffer.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// The kind of thing that happened during a reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconciliationEventType {
    MismatchDetected,
    LocalStateUpdated,
    OrderCancelled,
    StrategyFrozen,
    StrategyResumed,
    CycleCompleted,
}

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    pub event_type: ReconciliationEventType,
    pub ts_ns: u64,
    pub message: String,
    pub severity: MismatchSeverity,
    pub mismatch: Option<Mismatch>,
}

/// A fixed-capacity ring buffer of [`ReconciliationEvent`]s plus
/// monotonically increasing stat counters.
pub struct AuditTrail {
    capacity: usize,
    events: VecDeque<ReconciliationEvent>,
    pub orders_checked: u64,
    pub orders_matched: u64,
    pub mismatches_found: u64,
    pub orphans_found: u64,
    pub orphans_cancelled: u64,
    pub local_updates_applied: u64,
    pub strategy_freezes: u64,
}

impl AuditTrail {
    /// Create a trail with `capacity` (default [`DEFAULT_AUDIT_CAPACITY`]).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            orders_checked: 0,
            orders_matched: 0,
            mismatches_found: 0,
            orphans_found: 0,
            orphans_cancelled: 0,
            local_updates_applied: 0,
            strategy_freezes: 0,
        }
    }

    /// Push an event, evicting the oldest entry once at capacity.
    pub fn push(&mut self, event: ReconciliationEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Every retained event, oldest first.
    #[must_use]
    pub fn events(&self) -> &VecDeque<ReconciliationEvent> {
        &self.events
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(msg: &str) -> ReconciliationEvent {
        ReconciliationEvent {
            event_type: ReconciliationEventType::CycleCompleted,
            ts_ns: 0,
            message: msg.to_string(),
            severity: MismatchSeverity::Warning,
            mismatch: None,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_once_full() {
        let mut trail = AuditTrail::new(2);
        trail.push(event("a"));
        trail.push(event("b"));
        trail.push(event("c"));
        let msgs: Vec<&str> = trail.events().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["b", "c"]);
    }
}
