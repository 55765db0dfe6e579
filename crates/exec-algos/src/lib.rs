//! [H] Execution algorithms: TWAP and VWAP parent orders that emit child
//! orders through the smart order router, plus the [`AlgorithmManager`]
//! that owns them (`spec.md` §4.H).

mod manager;
mod progress;
mod twap;
mod vwap;

pub use manager::{Algorithm, AlgorithmManager};
pub use progress::{AlgoProgress, AlgoState, ChildSlice};
pub use twap::{TwapAlgorithm, TwapConfig};
pub use vwap::{VwapAlgorithm, VwapConfig};
