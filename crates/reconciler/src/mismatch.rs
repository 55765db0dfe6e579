//! Mismatch classification and remediation actions (`spec.md` §4.J table).

use common::{OrderStatus, SymbolId, Venue};
use serde::{Deserialize, Serialize};

/// Tolerance for comparing local and exchange average fill prices.
pub const AVG_PRICE_TOLERANCE: f64 = 1e-6;

/// How serious a detected mismatch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MismatchSeverity {
    /// Informational/auto-corrected drift.
    Warning,
    /// Requires remediation but not an immediate halt.
    Error,
    /// Local and exchange state have diverged in a way that risks
    /// duplicate or lost orders.
    Critical,
}

/// A single detected discrepancy between local and exchange order state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mismatch {
    pub venue: Venue,
    pub symbol: SymbolId,
    pub client_order_id: String,
    pub severity: MismatchSeverity,
    pub description: String,
    pub action: ReconciliationAction,
}

/// Remediation chosen for a [`Mismatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconciliationAction {
    /// Adopt the exchange's status/filled_qty/avg_price locally.
    UpdateLocalState { status: OrderStatus, filled_qty: f64, avg_price: f64 },
    /// Cancel an order the exchange has open but the local store has never seen.
    CancelOrphanedOrder,
    /// Consecutive-mismatch threshold breached for a strategy.
    FreezeStrategy { strategy_id: String },
    /// No automatic remedy; a human must resolve it.
    ManualIntervention,
}

/// An unresolved item requiring a human decision, surfaced on the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualInterventionItem {
    pub venue: Venue,
    pub client_order_id: String,
    pub severity: MismatchSeverity,
    pub description: String,
}

/// One side of the local-vs-exchange comparison for a single order.
pub struct OrderComparison {
    pub venue: Venue,
    pub symbol: SymbolId,
    pub client_order_id: String,
    pub local: Option<(OrderStatus, f64, f64)>,
    pub exchange: Option<(OrderStatus, f64, f64)>,
}

/// Classify one [`OrderComparison`] against the `spec.md` §4.J table.
/// Returns `None` when both sides agree.
#[must_use]
pub fn classify(cmp: &OrderComparison, auto_cancel_orphaned: bool) -> Option<Mismatch> {
    match (&cmp.local, &cmp.exchange) {
        (Some((local_status, local_qty, local_price)), Some((exch_status, exch_qty, exch_price))) => {
            if local_status.is_terminal() && !exch_status.is_terminal() {
                return Some(Mismatch {
                    venue: cmp.venue,
                    symbol: cmp.symbol.clone(),
                    client_order_id: cmp.client_order_id.clone(),
                    severity: MismatchSeverity::Critical,
                    description: format!("local status {local_status:?} terminal but exchange reports {exch_status:?} open"),
                    action: ReconciliationAction::ManualIntervention,
                });
            }
            if (local_price - exch_price).abs() > AVG_PRICE_TOLERANCE && *local_qty > 0.0 && *exch_qty > 0.0 {
                return Some(Mismatch {
                    venue: cmp.venue,
                    symbol: cmp.symbol.clone(),
                    client_order_id: cmp.client_order_id.clone(),
                    severity: MismatchSeverity::Error,
                    description: format!("local avg_price {local_price} differs from exchange avg_price {exch_price}"),
                    action: ReconciliationAction::UpdateLocalState { status: *exch_status, filled_qty: *exch_qty, avg_price: *exch_price },
                });
            }
            if local_qty < exch_qty {
                return Some(Mismatch {
                    venue: cmp.venue,
                    symbol: cmp.symbol.clone(),
                    client_order_id: cmp.client_order_id.clone(),
                    severity: MismatchSeverity::Warning,
                    description: format!("local filled_qty {local_qty} lags exchange filled_qty {exch_qty}"),
                    action: ReconciliationAction::UpdateLocalState { status: *exch_status, filled_qty: *exch_qty, avg_price: *exch_price },
                });
            }
            if !local_status.is_terminal() && exch_status.is_terminal() {
                return Some(Mismatch {
                    venue: cmp.venue,
                    symbol: cmp.symbol.clone(),
                    client_order_id: cmp.client_order_id.clone(),
                    severity: MismatchSeverity::Warning,
                    description: format!("local status {local_status:?} lags exchange terminal status {exch_status:?}"),
                    action: ReconciliationAction::UpdateLocalState { status: *exch_status, filled_qty: *exch_qty, avg_price: *exch_price },
                });
            }
            None
        }
        (None, Some((exch_status, _, _))) => Some(Mismatch {
            venue: cmp.venue,
            symbol: cmp.symbol.clone(),
            client_order_id: cmp.client_order_id.clone(),
            severity: MismatchSeverity::Error,
            description: format!("exchange reports order {} ({exch_status:?}) unknown to local store", cmp.client_order_id),
            action: if auto_cancel_orphaned {
                ReconciliationAction::CancelOrphanedOrder
            } else {
                ReconciliationAction::ManualIntervention
            },
        }),
        (Some(_), None) | (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(local: Option<(OrderStatus, f64, f64)>, exchange: Option<(OrderStatus, f64, f64)>) -> OrderComparison {
        OrderComparison {
            venue: Venue::Binance,
            symbol: SymbolId::new("BTCUSDT"),
            client_order_id: "c1".into(),
            local,
            exchange,
        }
    }

    #[test]
    fn local_terminal_exchange_open_is_critical() {
        let c = cmp(Some((OrderStatus::Canceled, 0.0, 0.0)), Some((OrderStatus::Accepted, 0.0, 0.0)));
        let m = classify(&c, true).unwrap();
        assert_eq!(m.severity, MismatchSeverity::Critical);
    }

    #[test]
    fn orphan_with_auto_cancel_produces_cancel_action() {
        let c = cmp(None, Some((OrderStatus::Accepted, 0.0, 0.0)));
        let m = classify(&c, true).unwrap();
        assert_eq!(m.severity, MismatchSeverity::Error);
        assert!(matches!(m.action, ReconciliationAction::CancelOrphanedOrder));
    }

    #[test]
    fn orphan_without_auto_cancel_requires_manual_intervention() {
        let c = cmp(None, Some((OrderStatus::Accepted, 0.0, 0.0)));
        let m = classify(&c, false).unwrap();
        assert!(matches!(m.action, ReconciliationAction::ManualIntervention));
    }

    #[test]
    fn filled_qty_lag_is_warning_with_auto_update() {
        let c = cmp(Some((OrderStatus::PartiallyFilled, 1.0, 100.0)), Some((OrderStatus::PartiallyFilled, 2.0, 100.0)));
        let m = classify(&c, true).unwrap();
        assert_eq!(m.severity, MismatchSeverity::Warning);
        assert!(matches!(m.action, ReconciliationAction::UpdateLocalState { .. }));
    }

    #[test]
    fn agreeing_sides_produce_no_mismatch() {
        let c = cmp(Some((OrderStatus::Filled, 1.0, 100.0)), Some((OrderStatus::Filled, 1.0, 100.0)));
        assert!(classify(&c, true).is_none());
    }
}
