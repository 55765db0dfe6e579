//! Bybit V5 adapter (`spec.md` §4.A, §6).

use crate::adapter::{Balance, ExchangeAdapter, Level, OrderBookSnapshot, Trade};
use crate::signing::sign_bybit;
use async_trait::async_trait;
use common::{
    now_ns, CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderStatus,
    PlaceOrderRequest, SymbolId,
};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Bybit adapter configuration.
pub struct BybitConfig {
    /// API key.
    pub api_key: String,
    /// API secret (HMAC).
    pub api_secret: String,
    /// `true` to hit Bybit's testnet host.
    pub testnet: bool,
    /// `recv_window`, milliseconds.
    pub recv_window_ms: u64,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Product category: `"spot"`, `"linear"`, `"inverse"`.
    pub category: String,
}

impl fmt::Debug for BybitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BybitConfig")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("testnet", &self.testnet)
            .field("category", &self.category)
            .finish()
    }
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: false,
            recv_window_ms: 5000,
            request_timeout: Duration::from_secs(30),
            category: "spot".to_string(),
        }
    }
}

/// Bybit exchange adapter (V5 unified API).
pub struct BybitAdapter {
    config: BybitConfig,
    http: reqwest::Client,
    base_url: &'static str,
    connected: AtomicBool,
}

impl BybitAdapter {
    /// Build a new adapter from `config`.
    #[must_use]
    pub fn new(config: BybitConfig) -> Self {
        let base_url = if config.testnet {
            "https://api-testnet.bybit.com"
        } else {
            "https://api.bybit.com"
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

    /// Convert the canonical symbol to Bybit's wire form: uppercase
    /// concatenation, e.g. `"BTCUSDT"`.
    fn wire_symbol(symbol: &SymbolId) -> String {
        symbol.as_str().replace('-', "").to_uppercase()
    }

    fn timestamp_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    fn signed_headers(&self, params: &str) -> Vec<(&'static str, String)> {
        let ts = Self::timestamp_ms();
        let signature = sign_bybit(
            self.config.api_secret.as_bytes(),
            ts,
            &self.config.api_key,
            self.config.recv_window_ms,
            params,
        );
        vec![
            ("X-BAPI-API-KEY", self.config.api_key.clone()),
            ("X-BAPI-SIGN", signature),
            ("X-BAPI-TIMESTAMP", ts.to_string()),
            ("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string()),
        ]
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
                reason: format!("bybit http {status}"),
            });
        }
        Some(CoreError::Network {
            reason: format!("bybit http {status}"),
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

    fn check_ret_code(ret_code: i64, ret_msg: &str) -> CoreResult<()> {
        if ret_code != 0 {
            return Err(CoreError::VenueReject {
                reason: ret_msg.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: T,
    /// Bybit's own response timestamp, in ms since epoch, present on every
    /// v5 response. The only exchange-reported timestamp available for
    /// `order/create` and `order/cancel`, which don't echo one in `result`.
    #[serde(rename = "time", default)]
    time_ms: Option<i64>,
}

impl<T> BybitEnvelope<T> {
    fn ts_exchange_ns(&self) -> u64 {
        self.time_ms.map(|ms| (ms.max(0) as u64) * 1_000_000).unwrap_or_else(now_ns)
    }
}

#[derive(Debug, Deserialize, Default)]
struct OrderResult {
    #[serde(rename = "orderId", default)]
    order_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct OrderListResult {
    #[serde(default)]
    list: Vec<OrderDetail>,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "cumExecQty", default)]
    cum_exec_qty: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    /// Ms-since-epoch string; Bybit returns timestamps as strings here.
    #[serde(rename = "updatedTime", default)]
    updated_time_ms: String,
}

impl OrderDetail {
    fn ts_exchange_ns(&self) -> u64 {
        self.updated_time_ms
            .parse::<i64>()
            .ok()
            .map(|ms| (ms.max(0) as u64) * 1_000_000)
            .unwrap_or_else(now_ns)
    }
}

fn map_bybit_status(raw: &str) -> OrderStatus {
    match raw {
        "New" | "Created" => OrderStatus::New,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Accepted,
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn name(&self) -> &str {
        "bybit"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    async fn connect(&self) -> CoreResult<()> {
        let params = format!("accountType=UNIFIED");
        let headers = self.signed_headers(&params);
        let mut req = self
            .http
            .get(format!("{}/v5/account/wallet-balance?{params}", self.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
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
            common::OrderSide::Buy => "Buy",
            common::OrderSide::Sell => "Sell",
        };
        let order_type = match req.order_type {
            common::OrderType::Market => "Market",
            _ => "Limit",
        };
        let body = serde_json::json!({
            "category": self.config.category,
            "symbol": Self::wire_symbol(&req.symbol),
            "side": side,
            "orderType": order_type,
            "qty": req.qty.to_string(),
            "price": req.price.map(|p| p.to_string()),
            "orderLinkId": req.client_order_id,
        })
        .to_string();
        let headers = self.signed_headers(&body);
        let mut http_req = self
            .http
            .post(format!("{}/v5/order/create", self.base_url))
            .header("Content-Type", "application/json")
            .body(body);
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let ts_recv = now_ns();
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        let ts_exchange_ns = env.ts_exchange_ns();
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(env.result.order_id),
            status: OrderStatus::New,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        let body = serde_json::json!({
            "category": self.config.category,
            "symbol": Self::wire_symbol(&req.symbol),
            "orderLinkId": req.client_order_id,
        })
        .to_string();
        let headers = self.signed_headers(&body);
        let mut http_req = self
            .http
            .post(format!("{}/v5/order/cancel", self.base_url))
            .header("Content-Type", "application/json")
            .body(body);
        let ts_recv = now_ns();
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        let ts_exchange_ns = env.ts_exchange_ns();
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(env.result.order_id),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let body = serde_json::json!({
            "category": self.config.category,
            "symbol": Self::wire_symbol(symbol),
            "orderId": venue_order_id,
        })
        .to_string();
        let headers = self.signed_headers(&body);
        let mut http_req = self
            .http
            .post(format!("{}/v5/order/cancel", self.base_url))
            .header("Content-Type", "application/json")
            .body(body);
        let ts_recv = now_ns();
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        let ts_exchange_ns = env.ts_exchange_ns();
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: String::new(),
            venue_order_id: Some(env.result.order_id),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let params = format!(
            "category={}&symbol={}&orderLinkId={}",
            self.config.category,
            Self::wire_symbol(symbol),
            client_order_id
        );
        let headers = self.signed_headers(&params);
        let mut req = self
            .http
            .get(format!("{}/v5/order/realtime?{params}", self.base_url));
        let ts_recv = now_ns();
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderListResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        let detail = env.result.list.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "order not found".to_string(),
        })?;
        let ts_exchange_ns = detail.ts_exchange_ns();
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some(detail.order_id),
            status: map_bybit_status(&detail.order_status),
            last_fill_qty: detail.cum_exec_qty.parse().unwrap_or(0.0),
            last_fill_price: detail.avg_price.parse().unwrap_or(0.0),
            ts_exchange_ns,
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        let params = format!("category={}&symbol={}", self.config.category, Self::wire_symbol(symbol));
        let headers = self.signed_headers(&params);
        let mut req = self
            .http
            .get(format!("{}/v5/order/realtime?{params}", self.base_url));
        let ts_recv = now_ns();
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderListResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        Ok(env
            .result
            .list
            .into_iter()
            .map(|d| {
                let ts_exchange_ns = d.ts_exchange_ns();
                ExecutionReport {
                    symbol: symbol.clone(),
                    client_order_id: String::new(),
                    venue_order_id: Some(d.order_id),
                    status: map_bybit_status(&d.order_status),
                    last_fill_qty: d.cum_exec_qty.parse().unwrap_or(0.0),
                    last_fill_price: d.avg_price.parse().unwrap_or(0.0),
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
        let params = format!(
            "category={}&symbol={}&startTime={}&endTime={}",
            self.config.category,
            Self::wire_symbol(symbol),
            start_ms,
            end_ms
        );
        let headers = self.signed_headers(&params);
        let mut req = self
            .http
            .get(format!("{}/v5/order/history?{params}", self.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<OrderListResult> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        Ok(env
            .result
            .list
            .into_iter()
            .map(|d| ExecutionReport {
                symbol: symbol.clone(),
                client_order_id: String::new(),
                venue_order_id: Some(d.order_id),
                status: map_bybit_status(&d.order_status),
                last_fill_qty: d.cum_exec_qty.parse().unwrap_or(0.0),
                last_fill_price: d.avg_price.parse().unwrap_or(0.0),
                ts_exchange_ns: now_ns(),
                ts_recv_ns: now_ns(),
                reason: None,
            })
            .collect())
    }

    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64> {
        #[derive(Deserialize)]
        struct TickerList {
            list: Vec<TickerDetail>,
        }
        #[derive(Deserialize)]
        struct TickerDetail {
            #[serde(rename = "lastPrice")]
            last_price: String,
        }
        let url = format!(
            "{}/v5/market/tickers?category={}&symbol={}",
            self.base_url,
            self.config.category,
            Self::wire_symbol(symbol)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<TickerList> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        let ticker = env.result.list.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "no ticker data".to_string(),
        })?;
        ticker.last_price.parse().map_err(|_| CoreError::Validation {
            reason: "unparseable price".to_string(),
        })
    }

    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot> {
        #[derive(Deserialize)]
        struct Book {
            b: Vec<[String; 2]>,
            a: Vec<[String; 2]>,
            ts: u64,
        }
        let url = format!(
            "{}/v5/market/orderbook?category={}&symbol={}&limit={}",
            self.base_url,
            self.config.category,
            Self::wire_symbol(symbol),
            depth.clamp(1, 200)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<Book> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
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
            bids: to_levels(env.result.b),
            asks: to_levels(env.result.a),
            ts_exchange_ns: env.result.ts * 1_000_000,
        })
    }

    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>> {
        #[derive(Deserialize)]
        struct TradeList {
            list: Vec<RawTrade>,
        }
        #[derive(Deserialize)]
        struct RawTrade {
            price: String,
            size: String,
            time: String,
            side: String,
        }
        let url = format!(
            "{}/v5/market/recent-trade?category={}&symbol={}&limit={}",
            self.base_url,
            self.config.category,
            Self::wire_symbol(symbol),
            limit.clamp(1, 1000)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<TradeList> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        Ok(env
            .result
            .list
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    price: t.price.parse().ok()?,
                    qty: t.size.parse().ok()?,
                    ts_exchange_ns: t.time.parse::<u64>().ok()? * 1_000_000,
                    buyer_taker: t.side == "Buy",
                })
            })
            .collect())
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        #[derive(Deserialize)]
        struct WalletList {
            list: Vec<WalletDetail>,
        }
        #[derive(Deserialize)]
        struct WalletDetail {
            coin: Vec<CoinBalance>,
        }
        #[derive(Deserialize)]
        struct CoinBalance {
            coin: String,
            #[serde(rename = "availToWithdraw", default)]
            avail_to_withdraw: String,
            #[serde(rename = "locked", default)]
            locked: String,
        }
        let params = "accountType=UNIFIED".to_string();
        let headers = self.signed_headers(&params);
        let mut req = self
            .http
            .get(format!("{}/v5/account/wallet-balance?{params}", self.base_url));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: BybitEnvelope<WalletList> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        Self::check_ret_code(env.ret_code, &env.ret_msg)?;
        Ok(env
            .result
            .list
            .into_iter()
            .flat_map(|w| w.coin)
            .map(|c| Balance {
                asset: c.coin,
                free: c.avail_to_withdraw.parse().unwrap_or(0.0),
                locked: c.locked.parse().unwrap_or(0.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_is_uppercase_concatenation() {
        assert_eq!(BybitAdapter::wire_symbol(&SymbolId::new("btc-usdt")), "BTCUSDT");
    }
}
