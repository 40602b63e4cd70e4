//! Deal Service (C6, §4.6): owns the open/closed lifecycle of a deal and the
//! realized-profit computation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::exchange::ExchangeGateway;
use crate::money::Money;
use crate::oms::store::DealStore;
use crate::oms::types::{Deal, DealId, DealStatus};
use crate::order_service::OrderService;
use crate::types::{CurrencyPair, Symbol};

pub struct DealService<G: ExchangeGateway> {
    store: Arc<DealStore>,
    orders: Arc<OrderService<G>>,
    gateway: Arc<G>,
}

impl<G: ExchangeGateway> DealService<G> {
    pub fn new(store: Arc<DealStore>, orders: Arc<OrderService<G>>, gateway: Arc<G>) -> Self {
        Self { store, orders, gateway }
    }

    pub fn create_deal(&self, pair: &CurrencyPair) -> Deal {
        let deal = Deal::new(pair.symbol.clone());
        self.store.save_deal(deal.clone());
        deal
    }

    /// Returns `(sufficient, free_balance, message)`.
    pub async fn check_balance(&self, quote: &str, required: Money) -> EngineResult<(bool, Money, String)> {
        let balances = self.gateway.fetch_balance().await?;
        let free = balances.get(quote).map(|b| b.free).unwrap_or(Money::ZERO);
        let sufficient = free >= required;
        let message = if sufficient {
            format!("sufficient {quote} balance: {free} >= {required}")
        } else {
            format!("insufficient {quote} balance: {free} < {required}")
        };
        Ok((sufficient, free, message))
    }

    /// Persists a deal after the coordinator attaches its buy/sell order ids.
    pub fn save_deal_refs(&self, deal: &Deal) {
        self.store.save_deal(deal.clone());
    }

    pub fn close_deal(&self, deal_id: DealId) -> EngineResult<Deal> {
        let mut deal = self
            .store
            .get_deal(deal_id)
            .ok_or_else(|| EngineError::validation("deal_id", format!("deal {deal_id} not found")))?;
        if deal.status != DealStatus::Open {
            return Err(EngineError::StateInvariantBreach {
                reason: format!("deal {deal_id} is not open"),
            });
        }
        deal.status = DealStatus::Closed;
        deal.closed_at = Some(chrono::Utc::now());
        self.store.save_deal(deal.clone());
        Ok(deal)
    }

    /// Refreshes both orders; if both are `FILLED`, closes the deal and
    /// records realized profit = sell-proceeds - buy-cost - fees.
    pub async fn close_if_completed(&self, deal: &Deal) -> EngineResult<Option<Deal>> {
        if !deal.is_open() {
            return Ok(None);
        }

        let (Some(buy_id), Some(sell_id)) = (deal.buy_order_id, deal.sell_order_id) else {
            return Ok(None);
        };

        let buy = self
            .store
            .get_by_id(buy_id)
            .ok_or_else(|| EngineError::OrderNotFound { order_id: Some(buy_id) })?;
        let sell = self
            .store
            .get_by_id(sell_id)
            .ok_or_else(|| EngineError::OrderNotFound { order_id: Some(sell_id) })?;

        let buy = if buy.is_filled() {
            buy
        } else {
            self.orders.refresh_status(buy).await?
        };
        let sell = if sell.is_filled() {
            sell
        } else {
            self.orders.refresh_status(sell).await?
        };

        if !buy.is_filled() || !sell.is_filled() {
            return Ok(None);
        }

        let buy_cost = buy.average_price * buy.filled_amount + buy.fees;
        let sell_proceeds = sell.average_price * sell.filled_amount - sell.fees;
        let realized_profit = sell_proceeds - buy_cost;

        let mut deal = deal.clone();
        deal.status = DealStatus::Closed;
        deal.closed_at = Some(chrono::Utc::now());
        deal.realized_profit = Some(realized_profit);
        self.store.save_deal(deal.clone());

        info!(deal_id = deal.id, profit = %realized_profit, "deal closed");
        Ok(Some(deal))
    }

    /// Cancels both orders of every open deal, then marks it `CANCELED`.
    pub async fn emergency_close_all(&self) {
        for deal in self.store.get_open_deals() {
            for order_id in [deal.buy_order_id, deal.sell_order_id].into_iter().flatten() {
                if let Some(order) = self.store.get_by_id(order_id) {
                    if order.status.is_open() {
                        if let Err(e) = self.orders.cancel(order).await {
                            warn!(deal_id = deal.id, order_id, error = %e, "emergency cancel failed");
                        }
                    }
                }
            }
            let mut deal = deal;
            deal.status = DealStatus::Canceled;
            deal.closed_at = Some(chrono::Utc::now());
            self.store.save_deal(deal);
        }
    }

    pub fn open_deal_count(&self, symbol: &Symbol) -> usize {
        self.store.open_deal_count(symbol)
    }
}
