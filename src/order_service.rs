//! Order Service (C5, §4.5): the only component that talks to the exchange
//! gateway on behalf of an order. Owns the retry policy and the
//! update-from-exchange-record rule.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::exchange::ExchangeGateway;
use crate::money::Money;
use crate::oms::store::DealStore;
use crate::oms::types::{Order, OrderId, OrderKind, OrderStatus};
use crate::types::{CurrencyPair, ExchangeOrderStatus, ExchangeRecord, Side, Symbol};

/// §4.5 retry policy: 3 retries, base 1s, factor 2.
const MAX_PLACEMENT_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct OrderService<G: ExchangeGateway> {
    store: Arc<DealStore>,
    gateway: Arc<G>,
}

impl<G: ExchangeGateway> OrderService<G> {
    pub fn new(store: Arc<DealStore>, gateway: Arc<G>) -> Self {
        Self { store, gateway }
    }

    fn apply_exchange_record(order: &mut Order, record: &ExchangeRecord) {
        order.exchange_id = Some(record.id.clone());
        order.filled_amount = record.filled;
        order.remaining_amount = record.remaining;
        if let Some(avg) = record.average {
            order.average_price = avg;
        }
        if let Some(fee) = &record.fee {
            order.fees = fee.cost;
            order.fee_currency = Some(fee.currency.clone());
        }
        order.exchange_timestamp = Some(record.timestamp);
        order.last_update = chrono::Utc::now();

        order.status = match (record.status, record.filled.is_positive()) {
            (ExchangeOrderStatus::Closed, _) => OrderStatus::Filled,
            (ExchangeOrderStatus::Canceled, _) => OrderStatus::Canceled,
            (ExchangeOrderStatus::Expired, _) => OrderStatus::Canceled,
            (ExchangeOrderStatus::Rejected, _) => OrderStatus::Failed,
            (ExchangeOrderStatus::Open, true) => OrderStatus::PartiallyFilled,
            (ExchangeOrderStatus::Open, false) => OrderStatus::Open,
        };
        if order.status.is_terminal() {
            order.closed_at = Some(chrono::Utc::now());
        }
    }

    async fn submit_with_retry(&self, order: &mut Order) -> EngineResult<()> {
        let mut last_err = None;
        for attempt in 0..=MAX_PLACEMENT_RETRIES {
            if attempt > 0 {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                sleep(delay).await;
            }
            order.retries = attempt;

            let result = self
                .gateway
                .create_order(&order.symbol, order.side, order.kind, order.amount, Some(order.price))
                .await;

            match result {
                Ok(record) => {
                    Self::apply_exchange_record(order, &record);
                    if order.status == OrderStatus::Pending {
                        order.status = OrderStatus::Open;
                    }
                    return Ok(());
                }
                Err(e) if e.is_fatal_rejection() => {
                    order.status = OrderStatus::Failed;
                    order.error_message = Some(e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    warn!(order_id = order.id, attempt, error = %e, "placement attempt failed");
                    last_err = Some(e);
                }
            }
        }
        order.status = OrderStatus::Failed;
        let err = last_err.unwrap_or(EngineError::Transient {
            reason: "exhausted placement retries".into(),
        });
        order.error_message = Some(err.to_string());
        Err(err)
    }

    async fn place(&self, mut order: Order) -> EngineResult<Order> {
        self.store.save(order.clone());
        let result = self.submit_with_retry(&mut order).await;
        self.store.save(order.clone());

        match result {
            Ok(()) => {
                if let Some(exchange_id) = order.exchange_id.clone() {
                    if let Ok(record) = self.gateway.fetch_order(&exchange_id, &order.symbol).await {
                        Self::apply_exchange_record(&mut order, &record);
                        self.store.save(order.clone());
                    }
                }
                Ok(order)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn place_buy(
        &self,
        pair: &CurrencyPair,
        amount: Money,
        price: Money,
        deal_id: crate::oms::types::DealId,
        kind: OrderKind,
    ) -> EngineResult<Order> {
        let order = crate::oms::factory::OrderFactory::create_buy(pair, amount, price, deal_id, kind, None)?;
        self.place(order).await
    }

    pub async fn place_sell(
        &self,
        pair: &CurrencyPair,
        amount: Money,
        price: Money,
        deal_id: crate::oms::types::DealId,
        kind: OrderKind,
    ) -> EngineResult<Order> {
        let order = crate::oms::factory::OrderFactory::create_sell(pair, amount, price, deal_id, kind, None)?;
        self.place(order).await
    }

    pub fn create_local_sell(
        &self,
        pair: &CurrencyPair,
        amount: Money,
        price: Money,
        deal_id: crate::oms::types::DealId,
    ) -> EngineResult<Order> {
        let order = crate::oms::factory::OrderFactory::create_sell(
            pair,
            amount,
            price,
            deal_id,
            OrderKind::Limit,
            None,
        )?;
        self.store.save(order.clone());
        Ok(order)
    }

    pub async fn place_existing(&self, mut order: Order) -> EngineResult<Order> {
        if order.status != OrderStatus::Pending {
            return Err(EngineError::InvalidOrderState {
                order_id: order.id,
                status: order.status,
            });
        }
        self.submit_with_retry(&mut order).await?;
        self.store.save(order.clone());
        Ok(order)
    }

    pub async fn refresh_status(&self, mut order: Order) -> EngineResult<Order> {
        let exchange_id = order
            .exchange_id
            .clone()
            .ok_or(EngineError::OrderNotFound { order_id: Some(order.id) })?;
        let record = self.gateway.fetch_order(&exchange_id, &order.symbol).await?;
        Self::apply_exchange_record(&mut order, &record);
        self.store.save(order.clone());
        Ok(order)
    }

    pub async fn cancel(&self, mut order: Order) -> EngineResult<Order> {
        let exchange_id = match &order.exchange_id {
            Some(id) => id.clone(),
            None => {
                order.status = OrderStatus::Canceled;
                order.closed_at = Some(chrono::Utc::now());
                self.store.save(order.clone());
                return Ok(order);
            }
        };

        match self.gateway.cancel_order(&exchange_id, &order.symbol).await {
            Ok(record) => {
                Self::apply_exchange_record(&mut order, &record);
                self.store.save(order.clone());
                Ok(order)
            }
            Err(EngineError::OrderNotFound { .. }) => {
                order.status = OrderStatus::NotFoundOnExchange;
                order.closed_at = Some(chrono::Utc::now());
                self.store.save(order.clone());
                Ok(order)
            }
            Err(e) => Err(e),
        }
    }

    /// Diffs local open orders against `fetch_open_orders`; returns ids whose
    /// status changed.
    pub async fn sync_open_orders(&self, symbol: Option<&Symbol>) -> EngineResult<Vec<OrderId>> {
        let locals: Vec<Order> = match symbol {
            Some(s) => self
                .store
                .get_orders_by_symbol(s)
                .into_iter()
                .filter(|o| o.status.is_open())
                .collect(),
            None => self.store.get_open_orders(),
        };

        let mut changed = Vec::new();
        let mut open_by_symbol: std::collections::HashMap<String, Vec<ExchangeRecord>> =
            std::collections::HashMap::new();

        for order in locals {
            let exchange_id = match &order.exchange_id {
                Some(id) => id.clone(),
                None => continue,
            };

            let remote_open = match open_by_symbol.get(order.symbol.as_str()) {
                Some(v) => v.clone(),
                None => {
                    let v = self.gateway.fetch_open_orders(&order.symbol).await?;
                    open_by_symbol.insert(order.symbol.as_str().to_string(), v.clone());
                    v
                }
            };

            if !remote_open.iter().any(|r| r.id == exchange_id) {
                if let Ok(record) = self.gateway.fetch_order(&exchange_id, &order.symbol).await {
                    let mut updated = order.clone();
                    Self::apply_exchange_record(&mut updated, &record);
                    if updated.status != order.status {
                        self.store.save(updated.clone());
                        changed.push(updated.id);
                        info!(order_id = updated.id, status = ?updated.status, "order status changed on sync");
                    }
                }
            }
        }

        Ok(changed)
    }

    pub async fn emergency_cancel_all(&self, symbol: Option<&Symbol>) {
        let opens: Vec<Order> = match symbol {
            Some(s) => self
                .store
                .get_orders_by_symbol(s)
                .into_iter()
                .filter(|o| o.status.is_open())
                .collect(),
            None => self.store.get_open_orders(),
        };

        for order in opens {
            if let Err(e) = self.cancel(order.clone()).await {
                warn!(order_id = order.id, error = %e, "emergency cancel failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Balance;
    use crate::types::{ExchangeFee, Symbol};
    use async_lock_free_test_gateway::FakeGateway;
    use std::collections::HashMap;

    mod async_lock_free_test_gateway {
        use super::*;

        #[derive(Clone, Default)]
        pub struct FakeGateway {
            pub next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
        }

        impl FakeGateway {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl ExchangeGateway for FakeGateway {
            async fn create_order(
                &self,
                symbol: &Symbol,
                side: Side,
                _kind: OrderKind,
                amount: Money,
                price: Option<Money>,
            ) -> EngineResult<ExchangeRecord> {
                let id = self
                    .next_id
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                    .to_string();
                Ok(ExchangeRecord {
                    id,
                    client_order_id: None,
                    timestamp: 0,
                    datetime: chrono::Utc::now(),
                    last_trade_timestamp: None,
                    status: crate::types::ExchangeOrderStatus::Open,
                    symbol: symbol.clone(),
                    kind: "limit_order".into(),
                    time_in_force: None,
                    side,
                    price: price.unwrap_or(Money::ZERO),
                    amount,
                    filled: Money::ZERO,
                    remaining: amount,
                    cost: None,
                    average: None,
                    fee: Some(ExchangeFee {
                        cost: Money::ZERO,
                        currency: "USDT".into(),
                        rate: None,
                    }),
                    info: serde_json::Value::Null,
                })
            }

            async fn cancel_order(&self, exchange_id: &str, symbol: &Symbol) -> EngineResult<ExchangeRecord> {
                Ok(ExchangeRecord {
                    id: exchange_id.to_string(),
                    client_order_id: None,
                    timestamp: 0,
                    datetime: chrono::Utc::now(),
                    last_trade_timestamp: None,
                    status: crate::types::ExchangeOrderStatus::Canceled,
                    symbol: symbol.clone(),
                    kind: "limit_order".into(),
                    time_in_force: None,
                    side: Side::Buy,
                    price: Money::ZERO,
                    amount: Money::ZERO,
                    filled: Money::ZERO,
                    remaining: Money::ZERO,
                    cost: None,
                    average: None,
                    fee: None,
                    info: serde_json::Value::Null,
                })
            }

            async fn fetch_order(&self, exchange_id: &str, symbol: &Symbol) -> EngineResult<ExchangeRecord> {
                self.create_order(symbol, Side::Buy, OrderKind::Limit, Money::from_f64(1.0), Some(Money::from_f64(1.0)))
                    .await
                    .map(|mut r| {
                        r.id = exchange_id.to_string();
                        r
                    })
            }

            async fn fetch_open_orders(&self, _symbol: &Symbol) -> EngineResult<Vec<ExchangeRecord>> {
                Ok(vec![])
            }

            async fn fetch_balance(&self) -> EngineResult<HashMap<String, Balance>> {
                Ok(HashMap::new())
            }

            async fn fetch_ticker(&self, _symbol: &Symbol) -> EngineResult<crate::types::Tick> {
                Ok(crate::types::Tick {
                    timestamp: chrono::Utc::now(),
                    last: Money::from_f64(100.0),
                    bid: Money::from_f64(99.9),
                    ask: Money::from_f64(100.1),
                    volume: Money::ZERO,
                })
            }

            async fn fetch_order_book(
                &self,
                symbol: &Symbol,
                _depth: usize,
            ) -> EngineResult<crate::types::OrderBookSnapshot> {
                Ok(crate::types::OrderBookSnapshot {
                    symbol: symbol.clone(),
                    timestamp: chrono::Utc::now(),
                    bids: vec![],
                    asks: vec![],
                })
            }

            fn watch_ticker(&self, _symbol: &Symbol) -> tokio::sync::mpsc::Receiver<crate::types::Tick> {
                tokio::sync::mpsc::channel(1).1
            }

            fn watch_order_book(
                &self,
                _symbol: &Symbol,
                _depth: usize,
            ) -> tokio::sync::mpsc::Receiver<crate::types::OrderBookSnapshot> {
                tokio::sync::mpsc::channel(1).1
            }

            async fn get_symbol_info(&self, symbol: &Symbol) -> EngineResult<CurrencyPair> {
                Ok(CurrencyPair {
                    symbol: symbol.clone(),
                    base: "ETH".into(),
                    quote: "USDT".into(),
                    price_tick: Money::from_f64(0.01),
                    amount_step: Money::from_f64(0.0001),
                    min_amount: Money::from_f64(0.0001),
                    max_amount: Money::from_f64(1000.0),
                    min_notional: Money::from_f64(10.0),
                    maker_fee: Money::from_f64(0.001),
                    taker_fee: Money::from_f64(0.001),
                    deal_quota: Money::from_f64(100.0),
                    deal_count: 5,
                    profit_markup: Money::from_f64(0.005),
                    order_life_time_minutes: 15,
                })
            }
        }
    }

    fn pair() -> CurrencyPair {
        CurrencyPair {
            symbol: Symbol::new("ETH/USDT"),
            base: "ETH".into(),
            quote: "USDT".into(),
            price_tick: Money::from_f64(0.01),
            amount_step: Money::from_f64(0.0001),
            min_amount: Money::from_f64(0.0001),
            max_amount: Money::from_f64(1000.0),
            min_notional: Money::from_f64(10.0),
            maker_fee: Money::from_f64(0.001),
            taker_fee: Money::from_f64(0.001),
            deal_quota: Money::from_f64(100.0),
            deal_count: 5,
            profit_markup: Money::from_f64(0.005),
            order_life_time_minutes: 15,
        }
    }

    #[tokio::test]
    async fn test_place_buy_marks_open_and_persists_exchange_id() {
        let store = Arc::new(DealStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let service = OrderService::new(store.clone(), gateway);

        let order = service
            .place_buy(&pair(), Money::from_f64(0.04), Money::from_f64(2500.0), 1, OrderKind::Limit)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Open);
        assert!(order.exchange_id.is_some());
    }

    #[tokio::test]
    async fn test_create_local_sell_stays_pending() {
        let store = Arc::new(DealStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let service = OrderService::new(store.clone(), gateway);

        let order = service
            .create_local_sell(&pair(), Money::from_f64(0.04), Money::from_f64(2600.0), 1)
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.exchange_id.is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_exchange_id_is_local_only() {
        let store = Arc::new(DealStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let service = OrderService::new(store.clone(), gateway);

        let order = service
            .create_local_sell(&pair(), Money::from_f64(0.04), Money::from_f64(2600.0), 1)
            .unwrap();
        let canceled = service.cancel(order).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
    }
}
