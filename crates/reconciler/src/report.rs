//! Per-cycle reconciliation report (`spec.md` §4.J).

use crate::mismatch::{ManualInterventionItem, Mismatch, MismatchSeverity};
use common::Venue;
use serde::{Deserialize, Serialize};

/// One venue's reconciliation cycle outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub venue: Venue,
    pub ts_ns: u64,
    pub orders_checked: u64,
    pub orders_matched: u64,
    pub mismatches: Vec<Mismatch>,
    pub orphans_found: u64,
    pub orphans_cancelled: u64,
    pub position_discrepancies: Vec<String>,
    pub manual_interventions: Vec<ManualInterventionItem>,
    pub max_severity: Option<MismatchSeverity>,
}

impl ReconciliationReport {
    /// Derive `max_severity` from `mismatches`, highest first.
    #[must_use]
    pub fn with_derived_severity(mut self) -> Self {
        self.max_severity = self.mismatches.iter().map(|m| m.severity).max();
        self
    }

    /// Stable JSON representation of the report.
    ///
    /// # Errors
    /// Returns an error if serialization fails (should not happen for this type).
    pub fn export_report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable text summary of the report.
    #[must_use]
    pub fn generate_report_summary(&self) -> String {
        let severity = self
            .max_severity
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "None".to_string());
        format!(
            "venue={:?} checked={} matched={} mismatches={} orphans_found={} orphans_cancelled={} position_discrepancies={} manual_interventions={} max_severity={}",
            self.venue,
            self.orders_checked,
            self.orders_matched,
            self.mismatches.len(),
            self.orphans_found,
            self.orphans_cancelled,
            self.position_discrepancies.len(),
            self.manual_interventions.len(),
            severity,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mismatch::ReconciliationAction;
    use common::{OrderStatus, SymbolId};

    fn sample_mismatch(severity: MismatchSeverity) -> Mismatch {
        Mismatch {
            venue: Venue::Binance,
            symbol: SymbolId::new("BTCUSDT"),
            client_order_id: "c1".into(),
            severity,
            description: "test".into(),
            action: ReconciliationAction::UpdateLocalState { status: OrderStatus::Filled, filled_qty: 1.0, avg_price: 100.0 },
        }
    }

    #[test]
    fn max_severity_picks_the_worst_mismatch() {
        let report = ReconciliationReport {
            venue: Venue::Binance,
            ts_ns: 0,
            orders_checked: 2,
            orders_matched: 0,
            mismatches: vec![sample_mismatch(MismatchSeverity::Warning), sample_mismatch(MismatchSeverity::Critical)],
            orphans_found: 0,
            orphans_cancelled: 0,
            position_discrepancies: vec![],
            manual_interventions: vec![],
            max_severity: None,
        }
        .with_derived_severity();
        assert_eq!(report.max_severity, Some(MismatchSeverity::Critical));
    }

    #[test]
    fn json_round_trips() {
        let report = ReconciliationReport {
            venue: Venue::Okx,
            ts_ns: 1,
            orders_checked: 1,
            orders_matched: 1,
            mismatches: vec![],
            orphans_found: 0,
            orphans_cancelled: 0,
            position_discrepancies: vec![],
            manual_interventions: vec![],
            max_severity: None,
        };
        let json = report.export_report_json().unwrap();
        let back: ReconciliationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.orders_checked, 1);
    }
}
