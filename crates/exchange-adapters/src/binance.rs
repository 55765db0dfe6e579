//! Binance spot/futures adapter (`spec.md` §4.A, §6).

use crate::adapter::{Balance, ExchangeAdapter, Level, OrderBookSnapshot, Trade};
use crate::signing::sign_binance;
use async_trait::async_trait;
use common::{
    now_ns, CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderStatus,
    PlaceOrderRequest, SymbolId,
};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Binance adapter configuration. `api_secret` is never exposed through
/// `Debug`.
pub struct BinanceConfig {
    /// API key, sent as the `X-MBX-APIKEY` header.
    pub api_key: String,
    /// HMAC secret.
    pub api_secret: String,
    /// `true` to hit testnet instead of mainnet.
    pub testnet: bool,
    /// Request timeout (`spec.md` §5 default 30s).
    pub request_timeout: Duration,
    /// `recvWindow` parameter, milliseconds.
    pub recv_window_ms: u64,
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceConfig")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("testnet", &self.testnet)
            .finish()
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: false,
            request_timeout: Duration::from_secs(30),
            recv_window_ms: 5000,
        }
    }
}

/// Binance exchange adapter.
pub struct BinanceAdapter {
    config: BinanceConfig,
    http: reqwest::Client,
    base_url: &'static str,
    connected: AtomicBool,
}

impl BinanceAdapter {
    /// Build a new adapter from `config`.
    #[must_use]
    pub fn new(config: BinanceConfig) -> Self {
        let base_url = if config.testnet {
            "https://testnet.binance.vision"
        } else {
            "https://api.binance.com"
        };
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds");
        Self {
            config,
            http,
            base_url,
            connected: AtomicBool::new(false),
        }
    }

    /// Convert the canonical symbol to Binance's wire form: uppercase
    /// concatenation, e.g. `"BTCUSDT"`.
    fn wire_symbol(symbol: &SymbolId) -> String {
        symbol.as_str().replace('-', "").to_uppercase()
    }

    fn timestamp_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push(("timestamp".to_string(), Self::timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), self.config.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_binance(self.config.api_secret.as_bytes(), &query);
        format!("{query}&signature={signature}")
    }

    fn classify_status(status: reqwest::StatusCode) -> Option<CoreError> {
        if status.is_success() {
            return None;
        }
        if status.as_u16() == 429 {
            return Some(CoreError::RateLimited { retry_after_ms: None });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Some(CoreError::Authentication);
        }
        if status.is_client_error() && status.as_u16() != 408 {
            return Some(CoreError::Validation {
                reason: format!("binance http {status}"),
            });
        }
        // 5xx and 408 are retryable.
        Some(CoreError::Network {
            reason: format!("binance http {status}"),
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
struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
    status: String,
    #[serde(rename = "executedQty", default)]
    executed_qty: String,
    #[serde(rename = "price", default)]
    price: String,
    /// Set on POST `/api/v3/order` responses.
    #[serde(rename = "transactTime", default)]
    transact_time_ms: Option<i64>,
    /// Set on GET `/api/v3/order`, `/openOrders`, `/allOrders` responses.
    #[serde(rename = "updateTime", default)]
    update_time_ms: Option<i64>,
}

impl BinanceOrderResponse {
    /// The venue's own report timestamp, falling back to the local clock
    /// only if neither wire field was present.
    fn ts_exchange_ns(&self) -> u64 {
        self.transact_time_ms
            .or(self.update_time_ms)
            .map(|ms| (ms.max(0) as u64) * 1_000_000)
            .unwrap_or_else(now_ns)
    }
}

fn map_binance_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Accepted,
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "binance"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    async fn connect(&self) -> CoreResult<()> {
        let query = self.signed_query(vec![]);
        let url = format!("{}/api/v3/account?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
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
        let order_type = match req.order_type {
            common::OrderType::Market => "MARKET",
            common::OrderType::Limit => "LIMIT",
            common::OrderType::StopLoss => "STOP_LOSS",
            common::OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            common::OrderType::TakeProfit => "TAKE_PROFIT",
            common::OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        };
        let mut params = vec![
            ("symbol".to_string(), Self::wire_symbol(&req.symbol)),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), order_type.to_string()),
            ("quantity".to_string(), req.qty.to_string()),
            ("newClientOrderId".to_string(), req.client_order_id.clone()),
        ];
        if let Some(price) = req.price {
            params.push(("price".to_string(), price.to_string()));
        }
        if let Some(stop) = req.stop_price {
            params.push(("stopPrice".to_string(), stop.to_string()));
        }
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/order?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        let status = resp.status();
        if let Some(err) = Self::classify_status(status) {
            return Err(err);
        }
        let body: BinanceOrderResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(body.order_id.to_string()),
            status: map_binance_status(&body.status),
            last_fill_qty: body.executed_qty.parse().unwrap_or(0.0),
            last_fill_price: body.price.parse().unwrap_or(0.0),
            ts_exchange_ns: body.ts_exchange_ns(),
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        let params = vec![
            ("symbol".to_string(), Self::wire_symbol(&req.symbol)),
            ("origClientOrderId".to_string(), req.client_order_id.clone()),
        ];
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/order?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: BinanceOrderResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(body.order_id.to_string()),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: body.ts_exchange_ns(),
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let params = vec![
            ("symbol".to_string(), Self::wire_symbol(symbol)),
            ("orderId".to_string(), venue_order_id.to_string()),
        ];
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/order?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: BinanceOrderResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: String::new(),
            venue_order_id: Some(venue_order_id.to_string()),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: body.ts_exchange_ns(),
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let params = vec![
            ("symbol".to_string(), Self::wire_symbol(symbol)),
            ("origClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/order?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: BinanceOrderResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some(body.order_id.to_string()),
            status: map_binance_status(&body.status),
            last_fill_qty: body.executed_qty.parse().unwrap_or(0.0),
            last_fill_price: body.price.parse().unwrap_or(0.0),
            ts_exchange_ns: body.ts_exchange_ns(),
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        let params = vec![("symbol".to_string(), Self::wire_symbol(symbol))];
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/openOrders?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: Vec<BinanceOrderResponse> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(body
            .into_iter()
            .map(|o| ExecutionReport {
                symbol: symbol.clone(),
                client_order_id: String::new(),
                venue_order_id: Some(o.order_id.to_string()),
                status: map_binance_status(&o.status),
                last_fill_qty: o.executed_qty.parse().unwrap_or(0.0),
                last_fill_price: o.price.parse().unwrap_or(0.0),
                ts_exchange_ns: o.ts_exchange_ns(),
                ts_recv_ns: ts_recv,
                reason: None,
            })
            .collect())
    }

    async fn query_orders_in_window(
        &self,
        symbol: &SymbolId,
        start_ms: u64,
        end_ms: u64,
    ) -> CoreResult<Vec<ExecutionReport>> {
        let params = vec![
            ("symbol".to_string(), Self::wire_symbol(symbol)),
            ("startTime".to_string(), start_ms.to_string()),
            ("endTime".to_string(), end_ms.to_string()),
        ];
        let query = self.signed_query(params);
        let url = format!("{}/api/v3/allOrders?{query}", self.base_url);
        let ts_recv = now_ns();
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: Vec<BinanceOrderResponse> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(body
            .into_iter()
            .map(|o| ExecutionReport {
                symbol: symbol.clone(),
                client_order_id: String::new(),
                venue_order_id: Some(o.order_id.to_string()),
                status: map_binance_status(&o.status),
                last_fill_qty: o.executed_qty.parse().unwrap_or(0.0),
                last_fill_price: o.price.parse().unwrap_or(0.0),
                ts_exchange_ns: o.ts_exchange_ns(),
                ts_recv_ns: ts_recv,
                reason: None,
            })
            .collect())
    }

    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            Self::wire_symbol(symbol)
        );
        #[derive(Deserialize)]
        struct Ticker {
            price: String,
        }
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let ticker: Ticker = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        ticker.price.parse().map_err(|_| CoreError::Validation {
            reason: "unparseable price".to_string(),
        })
    }

    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url,
            Self::wire_symbol(symbol),
            depth.clamp(1, 5000)
        );
        #[derive(Deserialize)]
        struct DepthResponse {
            bids: Vec<[String; 2]>,
            asks: Vec<[String; 2]>,
        }
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: DepthResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        let to_levels = |raw: Vec<[String; 2]>| -> Vec<Level> {
            raw.into_iter()
                .filter_map(|[p, q]| {
                    Some(Level {
                        price: p.parse().ok()?,
                        qty: q.parse().ok()?,
                    })
                })
                .collect()
        };
        Ok(OrderBookSnapshot {
            bids: to_levels(body.bids),
            asks: to_levels(body.asks),
            ts_exchange_ns: now_ns(),
        })
    }

    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>> {
        let url = format!(
            "{}/api/v3/trades?symbol={}&limit={}",
            self.base_url,
            Self::wire_symbol(symbol),
            limit.clamp(1, 1000)
        );
        #[derive(Deserialize)]
        struct RawTrade {
            price: String,
            qty: String,
            time: i64,
            #[serde(rename = "isBuyerMaker")]
            is_buyer_maker: bool,
        }
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: Vec<RawTrade> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(body
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    price: t.price.parse().ok()?,
                    qty: t.qty.parse().ok()?,
                    ts_exchange_ns: (t.time.max(0) as u64) * 1_000_000,
                    buyer_taker: !t.is_buyer_maker,
                })
            })
            .collect())
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        #[derive(Deserialize)]
        struct AccountResponse {
            balances: Vec<RawBalance>,
        }
        #[derive(Deserialize)]
        struct RawBalance {
            asset: String,
            free: String,
            locked: String,
        }
        let query = self.signed_query(vec![]);
        let url = format!("{}/api/v3/account?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let body: AccountResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Ok(body
            .balances
            .into_iter()
            .filter_map(|b| {
                Some(Balance {
                    asset: b.asset,
                    free: b.free.parse().ok()?,
                    locked: b.locked.parse().ok()?,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_is_uppercase_concatenation() {
        assert_eq!(BinanceAdapter::wire_symbol(&SymbolId::new("btc-usdt")), "BTCUSDT");
        assert_eq!(BinanceAdapter::wire_symbol(&SymbolId::new("BTCUSDT")), "BTCUSDT");
    }
}
