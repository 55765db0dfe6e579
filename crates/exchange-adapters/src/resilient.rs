//! [B] `ResilientAdapter`: retry + circuit breaker + health + counters around
//! an inner [`ExchangeAdapter`] (`spec.md` §4.B).

use crate::adapter::{Balance, ExchangeAdapter, OrderBookSnapshot, Trade};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use async_trait::async_trait;
use common::{CancelOrderRequest, CoreError, CoreResult, ExecutionReport, PlaceOrderRequest, SymbolId};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter, bounded by `max_retries` / `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: u32,
    /// Jitter fraction in `[0, 1]`: the actual delay is drawn uniformly from
    /// `[delay * (1 - jitter), delay]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_retries: 3,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let jitter_floor = capped_ms * (1.0 - self.jitter);
        let jittered = jitter_floor + rand::random::<f64>() * (capped_ms - jitter_floor);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Monotonically increasing counters for a [`ResilientAdapter`].
#[derive(Debug, Default)]
pub struct ResilientStats {
    /// Total calls attempted through this wrapper.
    pub total_requests: AtomicU64,
    /// Calls that ultimately succeeded.
    pub successful: AtomicU64,
    /// Calls that ultimately failed (including circuit-open rejections).
    pub failed: AtomicU64,
    /// Total number of retry attempts issued across all calls.
    pub retried: AtomicU64,
    /// Calls rejected immediately by an open circuit.
    pub circuit_breaker_rejections: AtomicU64,
}

impl ResilientStats {
    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> ResilientStatsSnapshot {
        ResilientStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            circuit_breaker_rejections: self.circuit_breaker_rejections.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`ResilientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResilientStatsSnapshot {
    /// See [`ResilientStats::total_requests`].
    pub total_requests: u64,
    /// See [`ResilientStats::successful`].
    pub successful: u64,
    /// See [`ResilientStats::failed`].
    pub failed: u64,
    /// See [`ResilientStats::retried`].
    pub retried: u64,
    /// See [`ResilientStats::circuit_breaker_rejections`].
    pub circuit_breaker_rejections: u64,
}

/// Wraps an inner [`ExchangeAdapter`] with retry, a circuit breaker, and
/// request counters.
pub struct ResilientAdapter {
    inner: Arc<dyn ExchangeAdapter>,
    retry_policy: RetryPolicy,
    breaker: CircuitBreaker,
    stats: ResilientStats,
    name: String,
}

impl ResilientAdapter {
    /// Wrap `inner` with the given retry policy and circuit breaker config.
    #[must_use]
    pub fn new(
        inner: Arc<dyn ExchangeAdapter>,
        retry_policy: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let name = format!("resilient_{}", inner.name());
        Self {
            inner,
            retry_policy,
            breaker: CircuitBreaker::new(breaker_config),
            stats: ResilientStats::default(),
            name,
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Request counters snapshot.
    #[must_use]
    pub fn stats(&self) -> ResilientStatsSnapshot {
        self.stats.snapshot()
    }

    /// Healthy iff connected, the circuit is not `Open`, and the caller
    /// supplies a fresh latency reading — latency data lives in the
    /// Coordinator's [`market_data::LatencyTracker`], so freshness is
    /// computed there and passed in (`spec.md` §4.B).
    #[must_use]
    pub fn is_healthy(&self, latency_fresh: bool) -> bool {
        self.inner.is_connected() && self.circuit_state() != CircuitState::Open && latency_fresh
    }

    async fn call<T, F, Fut>(&self, op: F) -> CoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.breaker.allow_request() {
            self.stats
                .circuit_breaker_rejections
                .fetch_add(1, Ordering::Relaxed);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::CircuitOpen);
        }

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    self.stats.successful.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.retry_policy.max_retries => {
                    self.breaker.record_failure();
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(adapter = %self.inner.name(), attempt, ?delay, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl ExchangeAdapter for ResilientAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn connect(&self) -> CoreResult<()> {
        self.call(|| self.inner.connect()).await
    }

    async fn disconnect(&self) -> CoreResult<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn place_order(&self, req: &PlaceOrderRequest) -> CoreResult<ExecutionReport> {
        self.call(|| self.inner.place_order(req)).await
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        self.call(|| self.inner.cancel_order(req)).await
    }

    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.call(|| self.inner.cancel_order_by_id(symbol, venue_order_id))
            .await
    }

    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        self.call(|| self.inner.get_order(symbol, client_order_id))
            .await
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        self.call(|| self.inner.query_open_orders(symbol)).await
    }

    async fn query_orders_in_window(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>> {
        self.call(|| self.inner.query_orders_in_window(symbol, start_ms, end_ms))
            .await
    }

    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64> {
        self.call(|| self.inner.get_current_price(symbol)).await
    }

    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot> {
        self.call(|| self.inner.get_order_book(symbol, depth)).await
    }

    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>> {
        self.call(|| self.inner.get_recent_trades(symbol, limit))
            .await
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        self.call(|| self.inner.get_account_balance()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use std::sync::atomic::AtomicU32;

    /// An adapter whose `place_order` always fails with a `Network` error,
    /// for circuit-breaker testing (`spec.md` §8 S3).
    struct AlwaysFailsAdapter {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ExchangeAdapter for AlwaysFailsAdapter {
        fn name(&self) -> &str {
            "always_fails"
        }
        fn version(&self) -> &str {
            "0"
        }
        async fn connect(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> CoreResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn place_order(&self, _req: &PlaceOrderRequest) -> CoreResult<ExecutionReport> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CoreError::Network {
                reason: "unreachable".into(),
            })
        }
        async fn cancel_order(&self, _req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
            unimplemented!()
        }
        async fn cancel_order_by_id(&self, _s: &SymbolId, _v: &str) -> CoreResult<ExecutionReport> {
            unimplemented!()
        }
        async fn get_order(&self, _s: &SymbolId, _c: &str) -> CoreResult<ExecutionReport> {
            unimplemented!()
        }
        async fn query_open_orders(&self, _s: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
            unimplemented!()
        }
        async fn query_orders_in_window(
            &self,
            _s: &SymbolId,
            _a: u64,
            _b: u64,
        ) -> CoreResult<Vec<ExecutionReport>> {
            unimplemented!()
        }
        async fn get_current_price(&self, _s: &SymbolId) -> CoreResult<f64> {
            unimplemented!()
        }
        async fn get_order_book(&self, _s: &SymbolId, _d: usize) -> CoreResult<OrderBookSnapshot> {
            unimplemented!()
        }
        async fn get_recent_trades(&self, _s: &SymbolId, _l: usize) -> CoreResult<Vec<Trade>> {
            unimplemented!()
        }
        async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
            unimplemented!()
        }
    }

    fn sample_request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: SymbolId::new("BTCUSDT"),
            side: common::OrderSide::Buy,
            order_type: common::OrderType::Market,
            time_in_force: common::TimeInForce::Gtc,
            qty: 1.0,
            price: None,
            stop_price: None,
            client_order_id: "c1".into(),
            strategy_id: "s1".into(),
            reduce_only: false,
            post_only: false,
        }
    }

    #[tokio::test]
    async fn s3_circuit_trips_after_threshold_then_fails_fast() {
        let inner = Arc::new(AlwaysFailsAdapter {
            calls: AtomicU32::new(0),
        });
        let resilient = ResilientAdapter::new(
            inner.clone(),
            RetryPolicy {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );

        let req = sample_request();

        // First call: 1 attempt + 1 retry = 2 inner failures -> trips breaker.
        assert!(resilient.place_order(&req).await.is_err());
        assert_eq!(resilient.circuit_state(), CircuitState::Open);

        // Second call: breaker already open after the first call, so it
        // short-circuits without touching the inner adapter again.
        let calls_before = inner.calls.load(Ordering::Relaxed);
        let err = resilient.place_order(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::CircuitOpen));
        assert_eq!(inner.calls.load(Ordering::Relaxed), calls_before);

        let stats = resilient.stats();
        assert_eq!(stats.circuit_breaker_rejections, 1);
    }

    #[tokio::test]
    async fn resilient_name_is_prefixed() {
        let inner = Arc::new(MockAdapter::new("binance"));
        let resilient = ResilientAdapter::new(inner, RetryPolicy::default(), CircuitBreakerConfig::default());
        assert_eq!(resilient.name(), "resilient_binance");
    }
}
