//! Coinbase Advanced Trade adapter (`spec.md` §4.A, §6).

use crate::adapter::{Balance, ExchangeAdapter, Level, OrderBookSnapshot, Trade};
use crate::signing::sign_coinbase_jwt;
use async_trait::async_trait;
use common::{
    now_ns, CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderStatus,
    PlaceOrderRequest, SymbolId,
};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Coinbase Advanced Trade adapter configuration.
pub struct CoinbaseConfig {
    /// API key name.
    pub api_key: String,
    /// PKCS#8 EC private key PEM bytes for the API key's secret.
    pub ec_private_key_pem: Vec<u8>,
    /// `true` to hit the sandbox host.
    pub sandbox: bool,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for CoinbaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinbaseConfig")
            .field("api_key", &"<redacted>")
            .field("ec_private_key_pem", &"<redacted>")
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ec_private_key_pem: Vec::new(),
            sandbox: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Coinbase Advanced Trade adapter.
pub struct CoinbaseAdapter {
    config: CoinbaseConfig,
    http: reqwest::Client,
    host: &'static str,
    connected: AtomicBool,
}

impl CoinbaseAdapter {
    /// Build a new adapter from `config`.
    #[must_use]
    pub fn new(config: CoinbaseConfig) -> Self {
        let host = if config.sandbox {
            "api-sandbox.coinbase.com"
        } else {
            "api.coinbase.com"
        };
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds");
        Self {
            config,
            http,
            host,
            connected: AtomicBool::new(false),
        }
    }

    /// Convert the canonical symbol to Coinbase's wire form: `"BTC-USD"`.
    fn wire_symbol(symbol: &SymbolId) -> String {
        let raw = symbol.as_str().to_uppercase();
        if raw.contains('-') {
            return raw;
        }
        for quote in ["USDT", "USDC", "USD", "EUR", "BTC"] {
            if raw.ends_with(quote) && raw.len() > quote.len() {
                return format!("{}-{}", &raw[..raw.len() - quote.len()], quote);
            }
        }
        raw
    }

    fn auth_header(&self, method: &str, path: &str) -> CoreResult<String> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let token = sign_coinbase_jwt(
            &self.config.ec_private_key_pem,
            &self.config.api_key,
            method,
            self.host,
            path,
            now,
        )
        .map_err(|_| CoreError::Authentication)?;
        Ok(format!("Bearer {token}"))
    }

    fn classify_status(status: reqwest::StatusCode) -> Option<CoreError> {
        if status.is_success() {
            return None;
        }
        if status.as_u16() == 429 {
            return Some(CoreError::RateLimited { retry_after_ms: None });
        }
        if status.as_u16() == 401 {
            return Some(CoreError::Authentication);
        }
        if status.is_client_error() && status.as_u16() != 408 {
            return Some(CoreError::Validation {
                reason: format!("coinbase http {status}"),
            });
        }
        Some(CoreError::Network {
            reason: format!("coinbase http {status}"),
        })
    }

    fn map_transport_err(err: reqwest::Error) -> CoreError {
        CoreError::Network {
            reason: if err.is_timeout() {
                "timeout".to_string()
            } else {
                "transport error".to_string()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoinbaseOrderResponse {
    success: bool,
    #[serde(default)]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseOrderDetail {
    order_id: String,
    status: String,
    #[serde(default)]
    filled_size: String,
    #[serde(default)]
    average_filled_price: String,
    #[serde(default)]
    created_time: String,
}

impl CoinbaseOrderDetail {
    fn ts_exchange_ns(&self) -> u64 {
        chrono::DateTime::parse_from_rfc3339(&self.created_time)
            .ok()
            .and_then(|dt| dt.timestamp_nanos_opt())
            .map(|ns| ns.max(0) as u64)
            .unwrap_or_else(now_ns)
    }
}

fn map_coinbase_status(raw: &str) -> OrderStatus {
    match raw {
        "OPEN" => OrderStatus::New,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        "FAILED" => OrderStatus::Rejected,
        _ => OrderStatus::Accepted,
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn name(&self) -> &str {
        "coinbase"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    async fn connect(&self) -> CoreResult<()> {
        let path = "/api/v3/brokerage/accounts";
        let auth = self.auth_header("GET", path)?;
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> CoreResult<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn place_order(&self, req: &PlaceOrderRequest) -> CoreResult<ExecutionReport> {
        req.validate()?;
        let side = match req.side {
            common::OrderSide::Buy => "BUY",
            common::OrderSide::Sell => "SELL",
        };
        let order_config = match req.order_type {
            common::OrderType::Market => serde_json::json!({
                "market_market_ioc": { "base_size": req.qty.to_string() }
            }),
            _ => serde_json::json!({
                "limit_limit_gtc": {
                    "base_size": req.qty.to_string(),
                    "limit_price": req.price.unwrap_or(0.0).to_string(),
                    "post_only": req.post_only,
                }
            }),
        };
        let body = serde_json::json!({
            "client_order_id": req.client_order_id,
            "product_id": Self::wire_symbol(&req.symbol),
            "side": side,
            "order_configuration": order_config,
        })
        .to_string();
        let path = "/api/v3/brokerage/orders";
        let auth = self.auth_header("POST", path)?;
        let ts_recv = now_ns();
        let resp = self
            .http
            .post(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let parsed: CoinbaseOrderResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        if !parsed.success {
            return Err(CoreError::VenueReject {
                reason: "order create rejected".to_string(),
            });
        }
        // The order-create response carries no order timestamp (only
        // `success`/`order_id`); `ts_recv` is the best available signal.
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(parsed.order_id),
            status: OrderStatus::New,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: ts_recv,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        let order = self.get_order(&req.symbol, &req.client_order_id).await?;
        let venue_order_id = order.venue_order_id.ok_or(CoreError::Validation {
            reason: "no venue order id to cancel".to_string(),
        })?;
        self.cancel_order_by_id(&req.symbol, &venue_order_id).await
    }

    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let body = serde_json::json!({ "order_ids": [venue_order_id] }).to_string();
        let path = "/api/v3/brokerage/orders/batch_cancel";
        let auth = self.auth_header("POST", path)?;
        let ts_recv = now_ns();
        let resp = self
            .http
            .post(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        // batch_cancel's response carries only per-order success flags, no
        // order timestamp.
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: String::new(),
            venue_order_id: Some(venue_order_id.to_string()),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: ts_recv,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let path = format!(
            "/api/v3/brokerage/orders/historical/{}",
            client_order_id
        );
        let auth = self.auth_header("GET", &path)?;
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        #[derive(Deserialize)]
        struct Wrapper {
            order: CoinbaseOrderDetail,
        }
        let wrapper: Wrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        let d = wrapper.order;
        let ts_exchange_ns = d.ts_exchange_ns();
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some(d.order_id),
            status: map_coinbase_status(&d.status),
            last_fill_qty: d.filled_size.parse().unwrap_or(0.0),
            last_fill_price: d.average_filled_price.parse().unwrap_or(0.0),
            ts_exchange_ns,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        let path = format!(
            "/api/v3/brokerage/orders/historical/batch?product_id={}&order_status=OPEN",
            Self::wire_symbol(symbol)
        );
        let auth = self.auth_header("GET", &path)?;
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        #[derive(Deserialize)]
        struct Wrapper {
            orders: Vec<CoinbaseOrderDetail>,
        }
        let wrapper: Wrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(wrapper
            .orders
            .into_iter()
            .map(|d| {
                let ts_exchange_ns = d.ts_exchange_ns();
                ExecutionReport {
                    symbol: symbol.clone(),
                    client_order_id: String::new(),
                    venue_order_id: Some(d.order_id),
                    status: map_coinbase_status(&d.status),
                    last_fill_qty: d.filled_size.parse().unwrap_or(0.0),
                    last_fill_price: d.average_filled_price.parse().unwrap_or(0.0),
                    ts_exchange_ns,
                    ts_recv_ns: ts_recv,
                    reason: None,
                }
            })
            .collect())
    }

    async fn query_orders_in_window(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>> {
        let start_secs = start_ms / 1000;
        let end_secs = end_ms / 1000;
        let path = format!(
            "/api/v3/brokerage/orders/historical/batch?product_id={}&start_date={}&end_date={}",
            Self::wire_symbol(symbol),
            start_secs,
            end_secs
        );
        let auth = self.auth_header("GET", &path)?;
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        #[derive(Deserialize)]
        struct Wrapper {
            orders: Vec<CoinbaseOrderDetail>,
        }
        let wrapper: Wrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(wrapper
            .orders
            .into_iter()
            .map(|d| {
                let ts_exchange_ns = d.ts_exchange_ns();
                ExecutionReport {
                    symbol: symbol.clone(),
                    client_order_id: String::new(),
                    venue_order_id: Some(d.order_id),
                    status: map_coinbase_status(&d.status),
                    last_fill_qty: d.filled_size.parse().unwrap_or(0.0),
                    last_fill_price: d.average_filled_price.parse().unwrap_or(0.0),
                    ts_exchange_ns,
                    ts_recv_ns: ts_recv,
                    reason: None,
                }
            })
            .collect())
    }

    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64> {
        #[derive(Deserialize)]
        struct ProductResponse {
            price: String,
        }
        let path = format!("/api/v3/brokerage/products/{}", Self::wire_symbol(symbol));
        let auth = self.auth_header("GET", &path)?;
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let parsed: ProductResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        parsed.price.parse().map_err(|_| CoreError::Validation {
            reason: "unparseable price".to_string(),
        })
    }

    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot> {
        #[derive(Deserialize)]
        struct PricebookWrapper {
            pricebook: Pricebook,
        }
        #[derive(Deserialize)]
        struct Pricebook {
            bids: Vec<RawLevel>,
            asks: Vec<RawLevel>,
        }
        #[derive(Deserialize)]
        struct RawLevel {
            price: String,
            size: String,
        }
        let path = format!(
            "/api/v3/brokerage/product_book?product_id={}&limit={}",
            Self::wire_symbol(symbol),
            depth.clamp(1, 1000)
        );
        let auth = self.auth_header("GET", &path)?;
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let wrapper: PricebookWrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        let to_levels = |raw: Vec<RawLevel>| -> Vec<Level> {
            raw.into_iter()
                .filter_map(|l| {
                    Some(Level {
                        price: l.price.parse().ok()?,
                        qty: l.size.parse().ok()?,
                    })
                })
                .collect()
        };
        Ok(OrderBookSnapshot {
            bids: to_levels(wrapper.pricebook.bids),
            asks: to_levels(wrapper.pricebook.asks),
            ts_exchange_ns: now_ns(),
        })
    }

    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>> {
        #[derive(Deserialize)]
        struct TradesWrapper {
            trades: Vec<RawTrade>,
        }
        #[derive(Deserialize)]
        struct RawTrade {
            price: String,
            size: String,
            time: String,
            side: String,
        }
        let path = format!(
            "/api/v3/brokerage/products/{}/ticker?limit={}",
            Self::wire_symbol(symbol),
            limit.clamp(1, 1000)
        );
        let auth = self.auth_header("GET", &path)?;
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let wrapper: TradesWrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(wrapper
            .trades
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    price: t.price.parse().ok()?,
                    qty: t.size.parse().ok()?,
                    ts_exchange_ns: chrono::DateTime::parse_from_rfc3339(&t.time)
                        .ok()?
                        .timestamp_nanos_opt()?
                        .max(0) as u64,
                    buyer_taker: t.side == "BUY",
                })
            })
            .collect())
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        #[derive(Deserialize)]
        struct AccountsWrapper {
            accounts: Vec<RawAccount>,
        }
        #[derive(Deserialize)]
        struct RawAccount {
            currency: String,
            available_balance: Amount,
            hold: Amount,
        }
        #[derive(Deserialize)]
        struct Amount {
            value: String,
        }
        let path = "/api/v3/brokerage/accounts";
        let auth = self.auth_header("GET", path)?;
        let resp = self
            .http
            .get(format!("https://{}{}", self.host, path))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let wrapper: AccountsWrapper = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(wrapper
            .accounts
            .into_iter()
            .filter_map(|a| {
                Some(Balance {
                    asset: a.currency,
                    free: a.available_balance.value.parse().ok()?,
                    locked: a.hold.value.parse().ok()?,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_inserts_dash_for_common_quotes() {
        assert_eq!(CoinbaseAdapter::wire_symbol(&SymbolId::new("BTCUSD")), "BTC-USD");
        assert_eq!(CoinbaseAdapter::wire_symbol(&SymbolId::new("btc-usd")), "BTC-USD");
    }
}
