//! Stale-Buy Monitor (C11, §4.11).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::exchange::ExchangeGateway;
use crate::money::{quantize, Money, QuantizeMode};
use crate::oms::store::DealStore;
use crate::oms::types::{OrderId, OrderStatus};
use crate::order_service::OrderService;
use crate::types::CurrencyPair;

#[derive(Debug, Clone, Copy)]
pub struct StaleBuyConfig {
    pub max_age_minutes: i64,
    pub max_price_deviation_percent: f64,
    pub check_interval_seconds: u64,
    pub max_recreations_per_deal: u32,
    pub min_time_between_recreations_minutes: i64,
}

impl Default for StaleBuyConfig {
    fn default() -> Self {
        Self {
            max_age_minutes: 15,
            max_price_deviation_percent: 3.0,
            check_interval_seconds: 60,
            max_recreations_per_deal: 3,
            min_time_between_recreations_minutes: 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct StaleBuyStats {
    pub checks_performed: AtomicU64,
    pub stale_by_age: AtomicU64,
    pub stale_by_drift: AtomicU64,
    pub cancellations: AtomicU64,
    pub recreations: AtomicU64,
    pub recreation_failures: AtomicU64,
}

struct RecreationState {
    count: u32,
    last_recreated_at: chrono::DateTime<chrono::Utc>,
}

pub struct StaleBuyMonitor<G: ExchangeGateway> {
    store: Arc<DealStore>,
    orders: Arc<OrderService<G>>,
    gateway: Arc<G>,
    config: StaleBuyConfig,
    stats: StaleBuyStats,
    recreation_state: Mutex<HashMap<u64, RecreationState>>,
}

impl<G: ExchangeGateway> StaleBuyMonitor<G> {
    pub fn new(store: Arc<DealStore>, orders: Arc<OrderService<G>>, gateway: Arc<G>, config: StaleBuyConfig) -> Self {
        Self {
            store,
            orders,
            gateway,
            config,
            stats: StaleBuyStats::default(),
            recreation_state: Mutex::new(HashMap::new()),
        }
    }

    /// Timer period this monitor is meant to be driven at (§4.11: default 60 s).
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.config.check_interval_seconds)
    }

    /// One pass over all open/partially-filled BUYs.
    pub async fn run_once(&self, pair: &CurrencyPair) {
        let buys: Vec<_> = self
            .store
            .get_orders_by_symbol(&pair.symbol)
            .into_iter()
            .filter(|o| o.is_buy() && o.status.is_open())
            .collect();

        for buy in buys {
            self.stats.checks_performed.fetch_add(1, Ordering::Relaxed);

            let age_minutes = buy.age().num_minutes();
            let stale_by_age = age_minutes > self.config.max_age_minutes;
            if stale_by_age {
                self.stats.stale_by_age.fetch_add(1, Ordering::Relaxed);
            }

            let market = match self.gateway.fetch_ticker(&pair.symbol).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(order_id = buy.id, error = %e, "failed to fetch ticker for staleness check");
                    continue;
                }
            };

            let deviation = ((market.last - buy.price).abs() / buy.price * Money::from_f64(100.0)).to_f64();
            let stale_by_drift = deviation > self.config.max_price_deviation_percent;
            if stale_by_drift {
                self.stats.stale_by_drift.fetch_add(1, Ordering::Relaxed);
            }

            if !stale_by_drift {
                if stale_by_age {
                    // Age-only staleness: cancel, do not recreate.
                    if let Err(e) = self.orders.cancel(buy.clone()).await {
                        warn!(order_id = buy.id, error = %e, "failed to cancel age-stale buy");
                    } else {
                        self.stats.cancellations.fetch_add(1, Ordering::Relaxed);
                    }
                }
                continue;
            }

            let Some(deal_id) = buy.deal_id else { continue };
            if !self.can_recreate(deal_id).await {
                continue;
            }

            if let Err(e) = self.orders.cancel(buy.clone()).await {
                warn!(order_id = buy.id, error = %e, "stale-buy cancel failed (may already be gone)");
            } else {
                self.stats.cancellations.fetch_add(1, Ordering::Relaxed);
            }

            match self.recreate(pair, deal_id, &buy, market.last).await {
                Ok(new_order_id) => {
                    self.stats.recreations.fetch_add(1, Ordering::Relaxed);
                    self.record_recreation(deal_id).await;
                    info!(deal_id, old_order = buy.id, new_order = new_order_id, "recreated stale buy");
                }
                Err(e) => {
                    self.stats.recreation_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(deal_id, error = %e, "stale-buy recreation failed");
                }
            }
        }
    }

    async fn can_recreate(&self, deal_id: u64) -> bool {
        let state = self.recreation_state.lock().await;
        match state.get(&deal_id) {
            None => true,
            Some(s) => {
                let elapsed = chrono::Utc::now() - s.last_recreated_at;
                s.count < self.config.max_recreations_per_deal
                    && elapsed > ChronoDuration::minutes(self.config.min_time_between_recreations_minutes)
            }
        }
    }

    async fn record_recreation(&self, deal_id: u64) {
        let mut state = self.recreation_state.lock().await;
        let entry = state.entry(deal_id).or_insert(RecreationState {
            count: 0,
            last_recreated_at: chrono::Utc::now(),
        });
        entry.count += 1;
        entry.last_recreated_at = chrono::Utc::now();
    }

    async fn recreate(
        &self,
        pair: &CurrencyPair,
        deal_id: u64,
        old_buy: &crate::oms::types::Order,
        market_last: Money,
    ) -> crate::error::EngineResult<OrderId> {
        let new_price = quantize(market_last * Money::from_f64(0.999), pair.price_tick, QuantizeMode::Floor)?;
        let new_buy = self
            .orders
            .place_buy(pair, old_buy.amount, new_price, deal_id, old_buy.kind)
            .await?;

        let mut deal = self
            .store
            .get_deal(deal_id)
            .ok_or(crate::error::EngineError::StateInvariantBreach {
                reason: format!("deal {deal_id} missing during stale-buy recreation"),
            })?;
        deal.buy_order_id = Some(new_buy.id);
        self.store.save_deal(deal);

        if let Some(sell_id) = self.store.get_deal(deal_id).and_then(|d| d.sell_order_id) {
            if let Some(mut sell) = self.store.get_by_id(sell_id) {
                if sell.status == OrderStatus::Pending {
                    sell.price = quantize(
                        new_buy.price * (Money::ONE + pair.profit_markup),
                        pair.price_tick,
                        QuantizeMode::Ceil,
                    )?;
                    sell.amount = new_buy.amount;
                    sell.remaining_amount = sell.amount;
                    self.store.save(sell);
                }
            }
        }

        Ok(new_buy.id)
    }
}
