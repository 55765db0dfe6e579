//! [J] Account Reconciler: periodic local-vs-exchange comparison, orphan
//! handling, and strategy freeze (`spec.md` §4.J).

mod audit;
mod mismatch;
mod order_store;
mod reconciler;
mod report;

pub use audit::{ReconciliationEvent, ReconciliationEventType, DEFAULT_AUDIT_CAPACITY};
pub use mismatch::{ManualInterventionItem, Mismatch, MismatchSeverity, ReconciliationAction};
pub use order_store::{LocalOrderRecord, OrderStore};
pub use reconciler::{AccountReconciler, ReconcilerConfig, ReconcilerStats};
pub use report::ReconciliationReport;
