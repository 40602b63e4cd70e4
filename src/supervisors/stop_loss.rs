//! Tiered Stop-Loss (C14, §4.14): watches drawdown on filled buys and escalates
//! from a warning log to an unconditional market exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::deal_service::DealService;
use crate::error::EngineResult;
use crate::exchange::ExchangeGateway;
use crate::money::Money;
use crate::oms::store::DealStore;
use crate::oms::types::{DealId, OrderKind, OrderStatus};
use crate::order_service::OrderService;
use crate::orderbook::{BookSignal, OrderBookAnalyzer};
use crate::types::{CurrencyPair, OrderBookSnapshot};

const ORDER_BOOK_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct StopLossConfig {
    pub enable_stop_loss: bool,
    pub stop_loss_check_interval_seconds: u64,
    pub warning_drawdown_percent: f64,
    pub critical_drawdown_percent: f64,
    pub emergency_drawdown_percent: f64,
    pub critical_volume_imbalance_threshold: f64,
    pub critical_slippage_percent: f64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enable_stop_loss: true,
            stop_loss_check_interval_seconds: 10,
            warning_drawdown_percent: 5.0,
            critical_drawdown_percent: 10.0,
            emergency_drawdown_percent: 15.0,
            critical_volume_imbalance_threshold: -20.0,
            critical_slippage_percent: 2.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct StopLossStats {
    pub checks: AtomicU64,
    pub warnings_issued: AtomicU64,
    pub critical_exits: AtomicU64,
    pub emergency_exits: AtomicU64,
}

struct CachedBook {
    snapshot: OrderBookSnapshot,
    fetched_at: Instant,
}

pub struct TieredStopLoss<G: ExchangeGateway> {
    store: Arc<DealStore>,
    orders: Arc<OrderService<G>>,
    deals: Arc<DealService<G>>,
    gateway: Arc<G>,
    analyzer: OrderBookAnalyzer,
    config: StopLossConfig,
    stats: StopLossStats,
    book_cache: Mutex<HashMap<crate::types::Symbol, CachedBook>>,
    warned_deals: Mutex<std::collections::HashSet<DealId>>,
}

impl<G: ExchangeGateway> TieredStopLoss<G> {
    pub fn new(
        store: Arc<DealStore>,
        orders: Arc<OrderService<G>>,
        deals: Arc<DealService<G>>,
        gateway: Arc<G>,
        analyzer: OrderBookAnalyzer,
        config: StopLossConfig,
    ) -> Self {
        Self {
            store,
            orders,
            deals,
            gateway,
            analyzer,
            config,
            stats: StopLossStats::default(),
            book_cache: Mutex::new(HashMap::new()),
            warned_deals: Mutex::new(std::collections::HashSet::new()),
        }
    }

    async fn book_for(&self, pair: &CurrencyPair) -> EngineResult<crate::orderbook::BookAnalysis> {
        let mut cache = self.book_cache.lock().await;
        let needs_refresh = match cache.get(&pair.symbol) {
            Some(cached) => cached.fetched_at.elapsed() > ORDER_BOOK_CACHE_TTL,
            None => true,
        };
        if needs_refresh {
            let snapshot = self.gateway.fetch_order_book(&pair.symbol, 20).await?;
            cache.insert(
                pair.symbol.clone(),
                CachedBook {
                    snapshot,
                    fetched_at: Instant::now(),
                },
            );
        }
        let cached = cache.get(&pair.symbol).expect("just inserted or present");
        Ok(self.analyzer.analyze(&cached.snapshot))
    }

    /// Timer period this monitor is meant to be driven at (§6: `stop_loss_check_interval_seconds`).
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.config.stop_loss_check_interval_seconds)
    }

    /// One pass over every open deal whose buy has filled. No-op if disabled
    /// via `enable_stop_loss` (§6).
    pub async fn run_once(&self, pair: &CurrencyPair) {
        if !self.config.enable_stop_loss {
            return;
        }

        let open_deals: Vec<_> = self
            .store
            .get_open_deals()
            .into_iter()
            .filter(|d| d.symbol == pair.symbol)
            .collect();

        for deal in open_deals {
            let Some(buy_id) = deal.buy_order_id else { continue };
            let Some(buy) = self.store.get_by_id(buy_id) else { continue };
            if buy.status != OrderStatus::Filled || !buy.filled_amount.is_positive() {
                continue;
            }

            self.stats.checks.fetch_add(1, Ordering::Relaxed);

            let ticker = match self.gateway.fetch_ticker(&pair.symbol).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(deal_id = deal.id, error = %e, "stop-loss ticker fetch failed");
                    continue;
                }
            };

            let entry_price = buy.average_price;
            if !entry_price.is_positive() {
                continue;
            }
            let drawdown = ((entry_price - ticker.last) / entry_price * Money::from_f64(100.0)).to_f64();

            if drawdown >= self.config.emergency_drawdown_percent {
                self.emergency_exit(&deal, &buy, pair).await;
                continue;
            }

            if drawdown >= self.config.critical_drawdown_percent {
                let book = match self.book_for(pair).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(deal_id = deal.id, error = %e, "stop-loss order-book fetch failed");
                        continue;
                    }
                };
                let support_breached = book.support_level.map(|s| ticker.last < s).unwrap_or(false);
                let trigger = support_breached
                    || book.volume_imbalance < self.config.critical_volume_imbalance_threshold
                    || book.signal == BookSignal::StrongSell
                    || book.sell_slippage_percent > self.config.critical_slippage_percent;

                if trigger {
                    self.critical_exit(&deal, &buy, pair).await;
                }
                continue;
            }

            if drawdown >= self.config.warning_drawdown_percent {
                self.warn_once(&deal, pair).await;
            }
        }
    }

    async fn warn_once(&self, deal: &crate::oms::types::Deal, pair: &CurrencyPair) {
        let mut warned = self.warned_deals.lock().await;
        if warned.contains(&deal.id) {
            return;
        }
        let book = match self.book_for(pair).await {
            Ok(b) => b,
            Err(_) => return,
        };
        warn!(
            deal_id = deal.id,
            support = ?book.support_level,
            volume_imbalance = book.volume_imbalance,
            "drawdown warning threshold reached"
        );
        self.stats.warnings_issued.fetch_add(1, Ordering::Relaxed);
        warned.insert(deal.id);
    }

    async fn critical_exit(&self, deal: &crate::oms::types::Deal, buy: &crate::oms::types::Order, pair: &CurrencyPair) {
        if let Some(sell_id) = deal.sell_order_id {
            if let Some(sell) = self.store.get_by_id(sell_id) {
                if sell.status.is_open() {
                    if let Err(e) = self.orders.cancel(sell).await {
                        warn!(deal_id = deal.id, error = %e, "failed to cancel sell before critical exit");
                    }
                }
            }
        }
        self.market_sell_and_close(deal, buy, pair, "critical").await;
        self.stats.critical_exits.fetch_add(1, Ordering::Relaxed);
    }

    async fn emergency_exit(&self, deal: &crate::oms::types::Deal, buy: &crate::oms::types::Order, pair: &CurrencyPair) {
        if let Some(sell_id) = deal.sell_order_id {
            if let Some(sell) = self.store.get_by_id(sell_id) {
                if sell.status.is_open() {
                    if let Err(e) = self.orders.cancel(sell).await {
                        warn!(deal_id = deal.id, error = %e, "failed to cancel sell before emergency exit");
                    }
                }
            }
        }
        self.market_sell_and_close(deal, buy, pair, "emergency").await;
        self.stats.emergency_exits.fetch_add(1, Ordering::Relaxed);
    }

    async fn market_sell_and_close(
        &self,
        deal: &crate::oms::types::Deal,
        buy: &crate::oms::types::Order,
        pair: &CurrencyPair,
        tier: &str,
    ) {
        let result = self
            .orders
            .place_sell(pair, buy.filled_amount, Money::ZERO, deal.id, OrderKind::Market)
            .await;

        match result {
            Ok(order) => {
                info!(deal_id = deal.id, order_id = order.id, tier, "stop-loss market sell placed");
            }
            Err(e) => {
                error!(deal_id = deal.id, error = %e, tier, "stop-loss market sell failed, closing deal anyway");
            }
        }

        if let Err(e) = self.deals.close_deal(deal.id) {
            error!(deal_id = deal.id, error = %e, tier, "failed to close deal after stop-loss exit");
        }
    }
}
