//! [A] Exchange adapters: the `ExchangeAdapter` trait, per-venue REST
//! clients, request signing, a resilience decorator (retry + circuit
//! breaker), and a deterministic mock for tests.

pub mod adapter;
pub mod binance;
pub mod bybit;
pub mod circuit_breaker;
pub mod coinbase;
pub mod mock;
pub mod okx;
pub mod resilient;
pub mod signing;

pub use adapter::{
    Balance, ExchangeAdapter, Level, OrderBookSnapshot, ReconciliationQueryInterface, Trade,
};
pub use binance::{BinanceAdapter, BinanceConfig};
pub use bybit::{BybitAdapter, BybitConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use coinbase::{CoinbaseAdapter, CoinbaseConfig};
pub use mock::MockAdapter;
pub use okx::{OkxAdapter, OkxConfig};
pub use resilient::{ResilientAdapter, ResilientStats, ResilientStatsSnapshot, RetryPolicy};
