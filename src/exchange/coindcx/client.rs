//! Concrete `ExchangeGateway` adapter for a CoinDCX-shaped spot REST API.
//!
//! Carries the same fault-tolerance stack as the rest of the engine: a
//! circuit breaker, a token-bucket rate limiter, and retry with exponential
//! backoff — but the backoff here only ever applies to transient errors
//! (§4.5 classifies insufficient-funds/invalid-order as fatal, so those never
//! loop).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use super::auth::Credentials;
use super::wire::*;
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::error::{EngineError, EngineResult};
use crate::exchange::{Balance, ExchangeGateway};
use crate::money::Money;
use crate::oms::types::OrderKind;
use crate::types::{
    CurrencyPair, ExchangeFee, ExchangeOrderStatus, ExchangeRecord, Level, OrderBookSnapshot,
    Side, Symbol, Tick,
};

pub const API_BASE_URL: &str = "https://api.coindcx.com";
pub const PUBLIC_BASE_URL: &str = "https://public.coindcx.com";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_retries: u32,
    pub timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limiter = self.rate_limiter.with_rate(requests_per_second);
        self
    }
}

#[derive(Clone)]
pub struct CoinDcxGateway {
    credentials: Credentials,
    http_client: Client,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    max_retries: u32,
    poll_interval: Duration,
}

impl CoinDcxGateway {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::with_config(api_key, api_secret, ClientConfig::default())
    }

    pub fn with_config(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");

        Self {
            credentials: Credentials::new(api_key, api_secret),
            http_client,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(config.circuit_breaker))),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            max_retries: config.max_retries,
            poll_interval: config.poll_interval,
        }
    }

    pub fn from_env() -> EngineResult<Self> {
        let credentials = Credentials::from_env()
            .map_err(|e| EngineError::validation("credentials", e.to_string()))?;
        Ok(Self::with_config(
            credentials.api_key(),
            credentials.api_secret(),
            ClientConfig::default(),
        ))
    }

    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(EngineError::Transient {
                    reason: "circuit breaker is open".into(),
                });
            }
        }

        self.rate_limiter.acquire().await;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tracing::debug!(delay_ms = delay.as_millis() as u64, "retrying");
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    let mut cb = self.circuit_breaker.lock().await;
                    cb.record_success();
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "transient failure");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => {
                    let mut cb = self.circuit_breaker.lock().await;
                    cb.record_failure();
                    return Err(e);
                }
            }
        }

        let mut cb = self.circuit_breaker.lock().await;
        cb.record_failure();
        Err(last_error.unwrap_or_else(|| EngineError::Transient {
            reason: "exhausted retries".into(),
        }))
    }

    async fn authenticated_post<T, R>(&self, endpoint: &str, body: &T) -> EngineResult<R>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", API_BASE_URL, endpoint);
        let json_body = serde_json::to_string(body)
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
        let signature = self.credentials.sign(&json_body);

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-AUTH-APIKEY", self.credentials.api_key())
            .header("X-AUTH-SIGNATURE", signature)
            .body(json_body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_api_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| EngineError::Other(anyhow::anyhow!("failed to parse response: {e}")))
    }

    async fn public_get<R>(&self, url: &str) -> EngineResult<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_api_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Other(anyhow::anyhow!("failed to parse response: {e}")))
    }

    pub async fn circuit_breaker_state(&self) -> crate::common::CircuitState {
        self.circuit_breaker.lock().await.state()
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transient {
        reason: format!("transport error: {e}"),
    }
}

fn classify_api_error(status: u16, body: &str) -> EngineError {
    let lower = body.to_lowercase();
    if lower.contains("insufficient") {
        return EngineError::InsufficientFunds {
            currency: "unknown".into(),
            required: "unknown".into(),
            available: "unknown".into(),
        };
    }
    if status == 404 || lower.contains("not found") {
        return EngineError::OrderNotFound { order_id: None };
    }
    if status >= 500 || status == 429 || status == 408 {
        return EngineError::Transient {
            reason: format!("API error ({status}): {body}"),
        };
    }
    EngineError::InvalidOrder {
        reason: format!("API error ({status}): {body}"),
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn order_type_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "market_order",
        OrderKind::Limit => "limit_order",
        OrderKind::StopLoss => "stop_limit",
        OrderKind::TakeProfit => "take_profit",
    }
}

fn wire_status_to_exchange_status(status: &str) -> ExchangeOrderStatus {
    match status {
        "filled" => ExchangeOrderStatus::Closed,
        "cancelled" | "partially_cancelled" => ExchangeOrderStatus::Canceled,
        "rejected" => ExchangeOrderStatus::Rejected,
        _ => ExchangeOrderStatus::Open,
    }
}

fn wire_order_to_record(order: WireOrderResponse, symbol: &Symbol) -> ExchangeRecord {
    let filled = order
        .total_quantity
        .zip(order.remaining_quantity)
        .map(|(total, remaining)| total - remaining)
        .unwrap_or(0.0);

    ExchangeRecord {
        id: order.id,
        client_order_id: order.client_order_id,
        timestamp: chrono::Utc::now().timestamp_millis(),
        datetime: chrono::Utc::now(),
        last_trade_timestamp: None,
        status: wire_status_to_exchange_status(&order.status),
        symbol: symbol.clone(),
        kind: "unknown".into(),
        time_in_force: None,
        side: order
            .side
            .as_deref()
            .and_then(|s| if s == "buy" { Some(Side::Buy) } else if s == "sell" { Some(Side::Sell) } else { None })
            .unwrap_or(Side::Buy),
        price: Money::from_f64(order.price_per_unit.unwrap_or(0.0)),
        amount: Money::from_f64(order.total_quantity.unwrap_or(0.0)),
        filled: Money::from_f64(filled),
        remaining: Money::from_f64(order.remaining_quantity.unwrap_or(0.0)),
        cost: None,
        average: order.avg_price.map(Money::from_f64),
        fee: order.fee_amount.map(|f| ExchangeFee {
            cost: Money::from_f64(f),
            currency: String::new(),
            rate: None,
        }),
        info: serde_json::Value::Null,
    }
}

impl ExchangeGateway for CoinDcxGateway {
    async fn create_order(
        &self,
        symbol: &Symbol,
        side: Side,
        kind: OrderKind,
        amount: Money,
        price: Option<Money>,
    ) -> EngineResult<ExchangeRecord> {
        let request = WireOrderRequest {
            side: side_str(side).to_string(),
            order_type: order_type_str(kind).to_string(),
            market: symbol.as_str().replace('/', ""),
            price_per_unit: price.map(|p| p.to_f64()),
            total_quantity: amount.to_f64(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_order_id: None,
        };

        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            async move {
                let response: WireOrderResponse =
                    self.authenticated_post("/exchange/v1/orders/create", &req).await?;
                Ok(wire_order_to_record(response, &symbol))
            }
        })
        .await
    }

    async fn cancel_order(
        &self,
        exchange_id: &str,
        symbol: &Symbol,
    ) -> EngineResult<ExchangeRecord> {
        let request = WireCancelRequest {
            id: exchange_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            async move {
                let response: WireOrderResponse =
                    self.authenticated_post("/exchange/v1/orders/cancel", &req).await?;
                Ok(wire_order_to_record(response, &symbol))
            }
        })
        .await
    }

    async fn fetch_order(&self, exchange_id: &str, symbol: &Symbol) -> EngineResult<ExchangeRecord> {
        #[derive(serde::Serialize, Clone)]
        struct StatusRequest {
            id: String,
            timestamp: i64,
        }
        let request = StatusRequest {
            id: exchange_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            async move {
                let response: WireOrderResponse =
                    self.authenticated_post("/exchange/v1/orders/status", &req).await?;
                Ok(wire_order_to_record(response, &symbol))
            }
        })
        .await
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> EngineResult<Vec<ExchangeRecord>> {
        let request = WireActiveOrdersRequest {
            market: symbol.as_str().replace('/', ""),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            async move {
                let response: WireOrdersResponse = self
                    .authenticated_post("/exchange/v1/orders/active_orders", &req)
                    .await?;
                Ok(response
                    .orders
                    .into_iter()
                    .map(|o| wire_order_to_record(o, &symbol))
                    .collect())
            }
        })
        .await
    }

    async fn fetch_balance(&self) -> EngineResult<HashMap<String, Balance>> {
        let request = WireTimestampRequest::new();
        self.execute_with_retry(|| {
            let req = request.clone();
            async move {
                let balances: Vec<WireBalance> = self
                    .authenticated_post("/exchange/v1/users/balances", &req)
                    .await?;
                Ok(balances
                    .into_iter()
                    .map(|b| {
                        (
                            b.currency,
                            Balance {
                                free: Money::from_f64(b.balance),
                                total: Money::from_f64(b.balance + b.locked_balance),
                                used: Money::from_f64(b.locked_balance),
                            },
                        )
                    })
                    .collect())
            }
        })
        .await
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> EngineResult<Tick> {
        let market = symbol.as_str().replace('/', "");
        let url = format!("{}/exchange/ticker", API_BASE_URL);
        self.execute_with_retry(|| {
            let url = url.clone();
            let market = market.clone();
            async move {
                let tickers: Vec<WireTicker> = self.public_get(&url).await?;
                let ticker = tickers
                    .into_iter()
                    .find(|t| t.market == market)
                    .ok_or_else(|| EngineError::Transient {
                        reason: format!("ticker not found for {market}"),
                    })?;
                Ok(Tick {
                    timestamp: chrono::Utc::now(),
                    last: Money::from_f64(ticker.last_price),
                    bid: Money::from_f64(ticker.bid),
                    ask: Money::from_f64(ticker.ask),
                    volume: Money::from_f64(ticker.volume),
                })
            }
        })
        .await
    }

    async fn fetch_order_book(&self, symbol: &Symbol, depth: usize) -> EngineResult<OrderBookSnapshot> {
        let pair = symbol.as_str().replace('/', "_");
        let url = format!("{}/market_data/orderbook?pair=B-{}", PUBLIC_BASE_URL, pair);
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let url = url.clone();
            let symbol = symbol.clone();
            async move {
                let book: WireOrderBook = self.public_get(&url).await?;
                Ok(OrderBookSnapshot {
                    symbol: symbol.clone(),
                    timestamp: chrono::Utc::now(),
                    bids: book
                        .bids
                        .into_iter()
                        .take(depth)
                        .map(|l| Level {
                            price: Money::from_f64(l.price),
                            size: Money::from_f64(l.quantity),
                        })
                        .collect(),
                    asks: book
                        .asks
                        .into_iter()
                        .take(depth)
                        .map(|l| Level {
                            price: Money::from_f64(l.price),
                            size: Money::from_f64(l.quantity),
                        })
                        .collect(),
                })
            }
        })
        .await
    }

    fn watch_ticker(&self, symbol: &Symbol) -> mpsc::Receiver<Tick> {
        let (tx, rx) = mpsc::channel(16);
        let this = self.clone();
        let symbol = symbol.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            loop {
                match this.fetch_ticker(&symbol).await {
                    Ok(tick) => {
                        if tx.send(tick).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(symbol = %symbol, error = %e, "watch_ticker poll failed"),
                }
                sleep(interval).await;
            }
        });
        rx
    }

    fn watch_order_book(&self, symbol: &Symbol, depth: usize) -> mpsc::Receiver<OrderBookSnapshot> {
        let (tx, rx) = mpsc::channel(16);
        let this = self.clone();
        let symbol = symbol.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            loop {
                match this.fetch_order_book(&symbol, depth).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(symbol = %symbol, error = %e, "watch_order_book poll failed"),
                }
                sleep(interval).await;
            }
        });
        rx
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> EngineResult<CurrencyPair> {
        let url = format!("{}/exchange/v1/markets_details", API_BASE_URL);
        let market = symbol.as_str().replace('/', "");
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let url = url.clone();
            let market = market.clone();
            let symbol = symbol.clone();
            async move {
                let details: Vec<WireMarketDetails> = self.public_get(&url).await?;
                let detail = details
                    .into_iter()
                    .find(|d| d.coindcx_name == market)
                    .ok_or_else(|| EngineError::Validation {
                        what: "symbol".into(),
                        reason: format!("no market details for {market}"),
                    })?;

                Ok(CurrencyPair {
                    symbol: symbol.clone(),
                    base: detail.base_currency_short_name,
                    quote: detail.target_currency_short_name,
                    price_tick: Money::from_f64(detail.step),
                    amount_step: Money::from_f64(detail.step),
                    min_amount: Money::from_f64(detail.min_quantity),
                    max_amount: Money::from_f64(detail.max_quantity),
                    min_notional: Money::from_f64(detail.min_notional),
                    maker_fee: Money::from_f64(detail.maker_fee.unwrap_or(0.001)),
                    taker_fee: Money::from_f64(detail.taker_fee.unwrap_or(0.001)),
                    deal_quota: Money::ZERO,
                    deal_count: 0,
                    profit_markup: Money::ZERO,
                    order_life_time_minutes: 15,
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::default().with_max_retries(5).with_rate_limit(20);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.rate_limiter.max_requests_per_second, 20);
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let gateway = CoinDcxGateway::new("key", "secret");
        assert_eq!(gateway.circuit_breaker_state().await, crate::common::CircuitState::Closed);
    }

    #[test]
    fn test_classify_insufficient_funds() {
        let err = classify_api_error(400, "Insufficient balance for this trade");
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_classify_transient_on_5xx() {
        let err = classify_api_error(503, "service unavailable");
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_invalid_order_default() {
        let err = classify_api_error(422, "price below tick size");
        assert!(!err.is_transient());
        assert!(matches!(err, EngineError::InvalidOrder { .. }));
    }
}
