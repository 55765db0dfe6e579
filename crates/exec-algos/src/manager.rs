//! Owns a set of parent algorithms by id, fans out ticks and market data to
//! all of them, and routes fills to the owning algorithm (`spec.md` §4.H).

use crate::progress::{AlgoProgress, AlgoState};
use crate::twap::TwapAlgorithm;
use crate::vwap::VwapAlgorithm;
use common::{CoreResult, SymbolId, Venue};
use dashmap::DashMap;
use parking_lot::Mutex;
use smart_router::SmartOrderRouter;

/// Either concrete parent algorithm kind the manager can own.
pub enum Algorithm {
    /// A time-weighted-average-price run.
    Twap(TwapAlgorithm),
    /// A volume-weighted-average-price run.
    Vwap(VwapAlgorithm),
}

impl Algorithm {
    fn id(&self) -> &str {
        match self {
            Self::Twap(a) => a.id(),
            Self::Vwap(a) => a.id(),
        }
    }

    fn state(&self) -> AlgoState {
        match self {
            Self::Twap(a) => a.state(),
            Self::Vwap(a) => a.state(),
        }
    }

    fn progress(&self, now_ns: u64) -> AlgoProgress {
        match self {
            Self::Twap(a) => a.progress(now_ns),
            Self::Vwap(a) => a.progress(now_ns),
        }
    }

    fn start(&mut self, now_ns: u64) {
        match self {
            Self::Twap(a) => a.start(now_ns),
            Self::Vwap(a) => a.start(now_ns),
        }
    }

    fn pause(&mut self) {
        match self {
            Self::Twap(a) => a.pause(),
            Self::Vwap(a) => a.pause(),
        }
    }

    fn resume(&mut self) {
        match self {
            Self::Twap(a) => a.resume(),
            Self::Vwap(a) => a.resume(),
        }
    }

    fn cancel(&mut self) {
        match self {
            Self::Twap(a) => a.cancel(),
            Self::Vwap(a) => a.cancel(),
        }
    }

    fn open_children(&self) -> Vec<(Venue, SymbolId, String)> {
        match self {
            Self::Twap(a) => a.open_children(),
            Self::Vwap(a) => a.open_children(),
        }
    }

    fn on_market_update(&mut self, bid: f64, ask: f64, volume: f64) {
        match self {
            Self::Twap(a) => a.on_market_update(bid, ask, volume),
            Self::Vwap(a) => a.on_market_update(bid, ask, volume),
        }
    }

    fn on_fill(&mut self, child_id: &str, qty: f64, price: f64) {
        match self {
            Self::Twap(a) => a.on_fill(child_id, qty, price),
            Self::Vwap(a) => a.on_fill(child_id, qty, price),
        }
    }

    async fn on_tick(&mut self, now_ns: u64, router: &SmartOrderRouter) -> CoreResult<Option<String>> {
        match self {
            Self::Twap(a) => a.on_tick(now_ns, router).await,
            Self::Vwap(a) => a.on_tick(now_ns, router).await,
        }
    }
}

/// Owns every running parent algorithm, keyed by id (`spec.md` §4.H).
pub struct AlgorithmManager {
    algorithms: DashMap<String, Mutex<Algorithm>>,
    child_index: DashMap<String, String>,
}

impl Default for AlgorithmManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            algorithms: DashMap::new(),
            child_index: DashMap::new(),
        }
    }

    /// Register `algo` under its own id. Replaces any prior algorithm with
    /// the same id.
    pub fn register(&self, algo: Algorithm) -> String {
        let id = algo.id().to_string();
        self.algorithms.insert(id.clone(), Mutex::new(algo));
        id
    }

    /// Current lifecycle state of `id`, if registered.
    #[must_use]
    pub fn get_state(&self, id: &str) -> Option<AlgoState> {
        self.algorithms.get(id).map(|a| a.lock().state())
    }

    /// Current progress snapshot for `id`, if registered.
    #[must_use]
    pub fn get_progress(&self, id: &str, now_ns: u64) -> Option<AlgoProgress> {
        self.algorithms.get(id).map(|a| a.lock().progress(now_ns))
    }

    /// Start algorithm `id`.
    pub fn start(&self, id: &str, now_ns: u64) {
        if let Some(a) = self.algorithms.get(id) {
            a.lock().start(now_ns);
        }
    }

    /// Pause algorithm `id`.
    pub fn pause(&self, id: &str) {
        if let Some(a) = self.algorithms.get(id) {
            a.lock().pause();
        }
    }

    /// Resume algorithm `id`.
    pub fn resume(&self, id: &str) {
        if let Some(a) = self.algorithms.get(id) {
            a.lock().resume();
        }
    }

    /// Cancel algorithm `id` and return its still-open children for the
    /// caller to cancel through the router.
    #[must_use]
    pub fn cancel(&self, id: &str) -> Vec<(Venue, SymbolId, String)> {
        let Some(a) = self.algorithms.get(id) else {
            return Vec::new();
        };
        let mut guard = a.lock();
        let open = guard.open_children();
        guard.cancel();
        open
    }

    /// Drive every non-terminal algorithm's `on_tick`, returning the ids of
    /// child orders newly emitted, indexed to their owning algorithm.
    pub async fn on_tick(&self, now_ns: u64, router: &SmartOrderRouter) -> Vec<(String, CoreResult<Option<String>>)> {
        let ids: Vec<String> = self
            .algorithms
            .iter()
            .filter(|e| !e.value().lock().state().is_terminal())
            .map(|e| e.key().clone())
            .collect();

        let mut results = Vec::with_capacity(ids.len());
        for algo_id in ids {
            let Some(entry) = self.algorithms.get(&algo_id) else { continue };
            let outcome = entry.lock().on_tick(now_ns, router).await;
            if let Ok(Some(child_id)) = &outcome {
                self.child_index.insert(child_id.clone(), algo_id.clone());
            }
            results.push((algo_id, outcome));
        }
        results
    }

    /// Broadcast a market update to every registered algorithm.
    pub fn on_market_update(&self, bid: f64, ask: f64, volume: f64) {
        for entry in self.algorithms.iter() {
            entry.value().lock().on_market_update(bid, ask, volume);
        }
    }

    /// Route a fill to the algorithm that owns `child_id`, if any.
    pub fn on_fill(&self, child_id: &str, qty: f64, price: f64) {
        let Some(algo_id) = self.child_index.get(child_id).map(|e| e.clone()) else {
            return;
        };
        if let Some(a) = self.algorithms.get(&algo_id) {
            a.lock().on_fill(child_id, qty, price);
        }
    }

    /// Remove every algorithm in a terminal state, returning their ids.
    pub fn cleanup_completed(&self) -> Vec<String> {
        let done: Vec<String> = self
            .algorithms
            .iter()
            .filter(|e| e.value().lock().state().is_terminal())
            .map(|e| e.key().clone())
            .collect();
        for id in &done {
            self.algorithms.remove(id);
        }
        done
    }
}
