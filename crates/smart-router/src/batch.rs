//! Batch execution and cancel merging across venues (`spec.md` §4.G).

use common::{CancelOrderRequest, ExecutionReport, PlaceOrderRequest, SymbolId, Venue};
use coordinator::ExchangeCoordinator;
use futures_util::future::join_all;

/// Outcome of one child order within a batch or merged cancel.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    /// Venue the child targeted.
    pub venue: Venue,
    /// Client order id of the child.
    pub client_order_id: String,
    /// The report, if the call succeeded.
    pub report: Option<ExecutionReport>,
    /// The error message, if the call failed.
    pub error: Option<String>,
}

impl ChildOutcome {
    /// Whether this child succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.report.is_some()
    }
}

/// Result of [`crate::router::SmartOrderRouter::execute_batch`].
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Outcome of every child the batch attempted to place.
    pub results: Vec<ChildOutcome>,
    /// Children the router compensated (cancelled) after an atomic failure.
    pub compensated: Vec<ChildOutcome>,
}

impl BatchReport {
    /// Count of children that placed successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Count of children that failed to place.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }
}

/// Result of one id within [`crate::router::SmartOrderRouter::cancel_merged`].
#[derive(Debug, Clone)]
pub struct CancelResult {
    /// Venue the cancel targeted.
    pub venue: Venue,
    /// Client order id cancelled.
    pub client_order_id: String,
    /// Whether the cancel succeeded.
    pub success: bool,
    /// Error message, if it failed.
    pub error: Option<String>,
}

async fn place_one(coordinator: &ExchangeCoordinator, venue: Venue, req: &PlaceOrderRequest, now_ns: u64) -> ChildOutcome {
    match coordinator.place_order(req, Some(venue), now_ns).await {
        Ok(report) => ChildOutcome {
            venue,
            client_order_id: req.client_order_id.clone(),
            report: Some(report),
            error: None,
        },
        Err(e) => ChildOutcome {
            venue,
            client_order_id: req.client_order_id.clone(),
            report: None,
            error: Some(e.to_string()),
        },
    }
}

async fn cancel_one(coordinator: &ExchangeCoordinator, venue: Venue, symbol: &SymbolId, client_order_id: &str) -> ChildOutcome {
    let req = CancelOrderRequest {
        symbol: symbol.clone(),
        client_order_id: client_order_id.to_string(),
    };
    match coordinator.cancel_order(venue, &req).await {
        Ok(report) => ChildOutcome {
            venue,
            client_order_id: client_order_id.to_string(),
            report: Some(report),
            error: None,
        },
        Err(e) => ChildOutcome {
            venue,
            client_order_id: client_order_id.to_string(),
            report: None,
            error: Some(e.to_string()),
        },
    }
}

/// Place every `(venue, request)` pair. If `atomic`, the first failure stops
/// further placements and issues compensating cancels for every child that
/// had already succeeded (`spec.md` §4.G). If not atomic, every child is
/// attempted independently and all outcomes are returned.
pub async fn execute_batch(
    coordinator: &ExchangeCoordinator,
    batch: &[(Venue, PlaceOrderRequest)],
    atomic: bool,
    now_ns: u64,
) -> BatchReport {
    if !atomic {
        let futures = batch.iter().map(|(venue, req)| place_one(coordinator, *venue, req, now_ns));
        let results = join_all(futures).await;
        return BatchReport {
            results,
            compensated: Vec::new(),
        };
    }

    let mut results = Vec::with_capacity(batch.len());
    let mut failed = false;
    for (venue, req) in batch {
        if failed {
            break;
        }
        let outcome = place_one(coordinator, *venue, req, now_ns).await;
        if !outcome.is_ok() {
            failed = true;
        }
        results.push(outcome);
    }

    let mut compensated = Vec::new();
    if failed {
        let to_cancel: Vec<(Venue, SymbolId, String)> = results
            .iter()
            .filter(|r| r.is_ok())
            .filter_map(|r| {
                batch
                    .iter()
                    .find(|(v, req)| *v == r.venue && req.client_order_id == r.client_order_id)
                    .map(|(v, req)| (*v, req.symbol.clone(), req.client_order_id.clone()))
            })
            .collect();
        for (venue, symbol, client_order_id) in to_cancel {
            compensated.push(cancel_one(coordinator, venue, &symbol, &client_order_id).await);
        }
    }

    BatchReport { results, compensated }
}

/// Issue cancels for `ids`, serially within each venue (to respect per-venue
/// rate limits) but concurrently across venues (`spec.md` §4.G, §5).
pub async fn cancel_merged(coordinator: &ExchangeCoordinator, ids: &[(Venue, SymbolId, String)]) -> Vec<CancelResult> {
    let mut by_venue: std::collections::HashMap<Venue, Vec<(SymbolId, String)>> = std::collections::HashMap::new();
    for (venue, symbol, id) in ids {
        by_venue.entry(*venue).or_default().push((symbol.clone(), id.clone()));
    }

    let per_venue_futures = by_venue.into_iter().map(|(venue, items)| async move {
        let mut out = Vec::with_capacity(items.len());
        for (symbol, id) in items {
            let outcome = cancel_one(coordinator, venue, &symbol, &id).await;
            out.push(CancelResult {
                venue,
                client_order_id: id,
                success: outcome.is_ok(),
                error: outcome.error,
            });
        }
        out
    });

    join_all(per_venue_futures).await.into_iter().flatten().collect()
}
