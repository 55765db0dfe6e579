//! OKX adapter (`spec.md` §4.A, §6).

use crate::adapter::{Balance, ExchangeAdapter, Level, OrderBookSnapshot, Trade};
use crate::signing::sign_okx;
use async_trait::async_trait;
use common::{
    now_ns, CancelOrderRequest, CoreError, CoreResult, ExecutionReport, OrderStatus,
    PlaceOrderRequest, SymbolId,
};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// OKX adapter configuration.
pub struct OkxConfig {
    /// API key.
    pub api_key: String,
    /// API secret (HMAC).
    pub api_secret: String,
    /// API passphrase, set when the key was created.
    pub passphrase: String,
    /// `true` to send `x-simulated-trading: 1` and hit the demo environment.
    pub demo_trading: bool,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for OkxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OkxConfig")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("demo_trading", &self.demo_trading)
            .finish()
    }
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
            demo_trading: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// OKX exchange adapter. OKX uses a single production host for both live and
/// demo trading, distinguished by the `x-simulated-trading` header.
pub struct OkxAdapter {
    config: OkxConfig,
    http: reqwest::Client,
    base_url: &'static str,
    connected: AtomicBool,
}

impl OkxAdapter {
    /// Build a new adapter from `config`.
    #[must_use]
    pub fn new(config: OkxConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds");
        Self {
            config,
            http,
            base_url: "https://www.okx.com",
            connected: AtomicBool::new(false),
        }
    }

    /// Convert the canonical symbol to OKX's wire form: `"BTC-USDT"`.
    fn wire_symbol(symbol: &SymbolId) -> String {
        let raw = symbol.as_str().to_uppercase();
        if raw.contains('-') {
            raw
        } else if let Some(idx) = raw
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_ascii_digit())
            .map(|_| raw.len())
        {
            // No delimiter present; best-effort split on common quote assets.
            for quote in ["USDT", "USDC", "USD", "BTC", "ETH"] {
                if raw.ends_with(quote) && raw.len() > quote.len() {
                    return format!("{}-{}", &raw[..raw.len() - quote.len()], quote);
                }
            }
            let _ = idx;
            raw
        } else {
            raw
        }
    }

    fn iso_timestamp() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    fn signed_headers(&self, method: &str, path: &str, body: &str) -> Vec<(&'static str, String)> {
        let ts = Self::iso_timestamp();
        let signature = sign_okx(self.config.api_secret.as_bytes(), &ts, method, path, body);
        let mut headers = vec![
            ("OK-ACCESS-KEY", self.config.api_key.clone()),
            ("OK-ACCESS-SIGN", signature),
            ("OK-ACCESS-TIMESTAMP", ts),
            ("OK-ACCESS-PASSPHRASE", self.config.passphrase.clone()),
        ];
        if self.config.demo_trading {
            headers.push(("x-simulated-trading", "1".to_string()));
        }
        headers
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
                reason: format!("okx http {status}"),
            });
        }
        Some(CoreError::Network {
            reason: format!("okx http {status}"),
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
struct OkxEnvelope<T> {
    code: String,
    msg: String,
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OkxOrderData {
    #[serde(rename = "ordId")]
    ord_id: String,
    state: String,
    #[serde(rename = "accFillSz", default)]
    acc_fill_sz: String,
    #[serde(rename = "avgPx", default)]
    avg_px: String,
}

fn map_okx_status(raw: &str) -> OrderStatus {
    match raw {
        "live" => OrderStatus::New,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Accepted,
    }
}

fn check_envelope<T>(env: &OkxEnvelope<T>) -> CoreResult<()> {
    if env.code != "0" {
        return Err(CoreError::VenueReject {
            reason: env.msg.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn name(&self) -> &str {
        "okx"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    async fn connect(&self) -> CoreResult<()> {
        let path = "/api/v5/account/balance";
        let headers = self.signed_headers("GET", path, "");
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
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
            common::OrderSide::Buy => "buy",
            common::OrderSide::Sell => "sell",
        };
        let ord_type = match req.order_type {
            common::OrderType::Market => "market",
            common::OrderType::Limit => "limit",
            _ => "limit",
        };
        let body = serde_json::json!({
            "instId": Self::wire_symbol(&req.symbol),
            "tdMode": "cash",
            "side": side,
            "ordType": ord_type,
            "sz": req.qty.to_string(),
            "px": req.price.map(|p| p.to_string()),
            "clOrdId": req.client_order_id,
        })
        .to_string();
        let path = "/api/v5/trade/order";
        let headers = self.signed_headers("POST", path, &body);
        let mut http_req = self.http.post(format!("{}{}", self.base_url, path)).body(body);
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let ts_recv = now_ns();
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<OkxOrderData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        let data = env.data.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "empty order response".to_string(),
        })?;
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: Some(data.ord_id),
            status: map_okx_status(&data.state),
            last_fill_qty: data.acc_fill_sz.parse().unwrap_or(0.0),
            last_fill_price: data.avg_px.parse().unwrap_or(0.0),
            ts_exchange_ns: now_ns(),
            ts_recv_ns: ts_recv,
            reason: None,
        })
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> CoreResult<ExecutionReport> {
        let body = serde_json::json!({
            "instId": Self::wire_symbol(&req.symbol),
            "clOrdId": req.client_order_id,
        })
        .to_string();
        let path = "/api/v5/trade/cancel-order";
        let headers = self.signed_headers("POST", path, &body);
        let mut http_req = self.http.post(format!("{}{}", self.base_url, path)).body(body);
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<OkxOrderData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        let data = env.data.into_iter().next();
        Ok(ExecutionReport {
            symbol: req.symbol.clone(),
            client_order_id: req.client_order_id.clone(),
            venue_order_id: data.map(|d| d.ord_id),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        })
    }

    async fn cancel_order_by_id(
        &self,
        symbol: &SymbolId,
        venue_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let body = serde_json::json!({
            "instId": Self::wire_symbol(symbol),
            "ordId": venue_order_id,
        })
        .to_string();
        let path = "/api/v5/trade/cancel-order";
        let headers = self.signed_headers("POST", path, &body);
        let mut http_req = self.http.post(format!("{}{}", self.base_url, path)).body(body);
        for (k, v) in headers {
            http_req = http_req.header(k, v);
        }
        let resp = http_req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: String::new(),
            venue_order_id: Some(venue_order_id.to_string()),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        })
    }

    async fn get_order(
        &self,
        symbol: &SymbolId,
        client_order_id: &str,
    ) -> CoreResult<ExecutionReport> {
        let path = format!(
            "/api/v5/trade/order?instId={}&clOrdId={}",
            Self::wire_symbol(symbol),
            client_order_id
        );
        let headers = self.signed_headers("GET", &path, "");
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<OkxOrderData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        let data = env.data.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "order not found".to_string(),
        })?;
        Ok(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: Some(data.ord_id),
            status: map_okx_status(&data.state),
            last_fill_qty: data.acc_fill_sz.parse().unwrap_or(0.0),
            last_fill_price: data.avg_px.parse().unwrap_or(0.0),
            ts_exchange_ns: now_ns(),
            ts_recv_ns: now_ns(),
            reason: None,
        })
    }

    async fn query_open_orders(&self, symbol: &SymbolId) -> CoreResult<Vec<ExecutionReport>> {
        let path = format!("/api/v5/trade/orders-pending?instId={}", Self::wire_symbol(symbol));
        let headers = self.signed_headers("GET", &path, "");
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<OkxOrderData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        Ok(env
            .data
            .into_iter()
            .map(|d| ExecutionReport {
                symbol: symbol.clone(),
                client_order_id: String::new(),
                venue_order_id: Some(d.ord_id),
                status: map_okx_status(&d.state),
                last_fill_qty: d.acc_fill_sz.parse().unwrap_or(0.0),
                last_fill_price: d.avg_px.parse().unwrap_or(0.0),
                ts_exchange_ns: now_ns(),
                ts_recv_ns: now_ns(),
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
        let path = format!(
            "/api/v5/trade/orders-history?instType=SPOT&instId={}&begin={}&end={}",
            Self::wire_symbol(symbol),
            start_ms,
            end_ms
        );
        let headers = self.signed_headers("GET", &path, "");
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<OkxOrderData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        Ok(env
            .data
            .into_iter()
            .map(|d| ExecutionReport {
                symbol: symbol.clone(),
                client_order_id: String::new(),
                venue_order_id: Some(d.ord_id),
                status: map_okx_status(&d.state),
                last_fill_qty: d.acc_fill_sz.parse().unwrap_or(0.0),
                last_fill_price: d.avg_px.parse().unwrap_or(0.0),
                ts_exchange_ns: now_ns(),
                ts_recv_ns: now_ns(),
                reason: None,
            })
            .collect())
    }

    async fn get_current_price(&self, symbol: &SymbolId) -> CoreResult<f64> {
        #[derive(Deserialize)]
        struct Ticker {
            last: String,
        }
        let url = format!(
            "{}/api/v5/market/ticker?instId={}",
            self.base_url,
            Self::wire_symbol(symbol)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<Ticker> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        let ticker = env.data.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "no ticker data".to_string(),
        })?;
        ticker.last.parse().map_err(|_| CoreError::Validation {
            reason: "unparseable price".to_string(),
        })
    }

    async fn get_order_book(&self, symbol: &SymbolId, depth: usize) -> CoreResult<OrderBookSnapshot> {
        #[derive(Deserialize)]
        struct Book {
            bids: Vec<[String; 4]>,
            asks: Vec<[String; 4]>,
            ts: String,
        }
        let url = format!(
            "{}/api/v5/market/books?instId={}&sz={}",
            self.base_url,
            Self::wire_symbol(symbol),
            depth.clamp(1, 400)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<Book> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        let book = env.data.into_iter().next().ok_or(CoreError::VenueReject {
            reason: "no book data".to_string(),
        })?;
        let to_levels = |raw: Vec<[String; 4]>| -> Vec<Level> {
            raw.into_iter()
                .filter_map(|[p, q, ..]| {
                    Some(Level {
                        price: p.parse().ok()?,
                        qty: q.parse().ok()?,
                    })
                })
                .collect()
        };
        Ok(OrderBookSnapshot {
            bids: to_levels(book.bids),
            asks: to_levels(book.asks),
            ts_exchange_ns: book.ts.parse::<u64>().unwrap_or(0) * 1_000_000,
        })
    }

    async fn get_recent_trades(&self, symbol: &SymbolId, limit: usize) -> CoreResult<Vec<Trade>> {
        #[derive(Deserialize)]
        struct RawTrade {
            px: String,
            sz: String,
            side: String,
            ts: String,
        }
        let url = format!(
            "{}/api/v5/market/trades?instId={}&limit={}",
            self.base_url,
            Self::wire_symbol(symbol),
            limit.clamp(1, 500)
        );
        let resp = self.http.get(&url).send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<RawTrade> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        Ok(env
            .data
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    price: t.px.parse().ok()?,
                    qty: t.sz.parse().ok()?,
                    ts_exchange_ns: t.ts.parse::<u64>().ok()? * 1_000_000,
                    buyer_taker: t.side == "buy",
                })
            })
            .collect())
    }

    async fn get_account_balance(&self) -> CoreResult<Vec<Balance>> {
        #[derive(Deserialize)]
        struct AccountData {
            details: Vec<RawDetail>,
        }
        #[derive(Deserialize)]
        struct RawDetail {
            ccy: String,
            #[serde(rename = "availBal")]
            avail_bal: String,
            #[serde(rename = "frozenBal")]
            frozen_bal: String,
        }
        let path = "/api/v5/account/balance";
        let headers = self.signed_headers("GET", path, "");
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        let env: OkxEnvelope<AccountData> = resp
            .json()
            .await
            .map_err(|e| CoreError::Network { reason: e.to_string() })?;
        check_envelope(&env)?;
        Ok(env
            .data
            .into_iter()
            .flat_map(|acc| acc.details)
            .filter_map(|d| {
                Some(Balance {
                    asset: d.ccy,
                    free: d.avail_bal.parse().ok()?,
                    locked: d.frozen_bal.parse().ok()?,
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
        assert_eq!(OkxAdapter::wire_symbol(&SymbolId::new("BTCUSDT")), "BTC-USDT");
        assert_eq!(OkxAdapter::wire_symbol(&SymbolId::new("btc-usdt")), "BTC-USDT");
    }
}
