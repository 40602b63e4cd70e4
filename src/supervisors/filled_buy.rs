//! Filled-Buy Handler (C12, §4.12): stages the paired SELL the moment its BUY
//! fills, without waiting for the deal-completion monitor's next tick.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::exchange::ExchangeGateway;
use crate::oms::store::DealStore;
use crate::oms::types::{OrderId, OrderStatus};
use crate::order_service::OrderService;

#[derive(Debug, Default)]
pub struct FilledBuyStats {
    pub runs: AtomicU64,
    pub sells_staged: AtomicU64,
    pub staging_failures: AtomicU64,
}

pub struct FilledBuyHandler<G: ExchangeGateway> {
    store: Arc<DealStore>,
    orders: Arc<OrderService<G>>,
    stats: FilledBuyStats,
    processed: Mutex<HashSet<OrderId>>,
}

impl<G: ExchangeGateway> FilledBuyHandler<G> {
    pub fn new(store: Arc<DealStore>, orders: Arc<OrderService<G>>) -> Self {
        Self {
            store,
            orders,
            stats: FilledBuyStats::default(),
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// One pass: find newly-filled buys whose paired sell is still PENDING
    /// and submit it to the exchange.
    pub async fn run_once(&self) {
        self.stats.runs.fetch_add(1, Ordering::Relaxed);

        let filled_buys = self.store.get_orders_by_status(OrderStatus::Filled);
        let mut processed = self.processed.lock().await;

        // Drop bookkeeping for orders whose deal has since closed, so the set
        // doesn't grow without bound over a long-running process.
        processed.retain(|id| {
            self.store
                .get_by_id(*id)
                .map(|o| o.deal_id.and_then(|d| self.store.get_deal(d)).map(|d| d.is_open()).unwrap_or(false))
                .unwrap_or(false)
        });

        for buy in filled_buys {
            if !buy.is_buy() || processed.contains(&buy.id) {
                continue;
            }
            let Some(deal_id) = buy.deal_id else { continue };
            let Some(deal) = self.store.get_deal(deal_id) else { continue };
            let Some(sell_id) = deal.sell_order_id else { continue };
            let Some(sell) = self.store.get_by_id(sell_id) else { continue };
            if sell.status != OrderStatus::Pending {
                processed.insert(buy.id);
                continue;
            }

            match self.orders.place_existing(sell).await {
                Ok(placed) => {
                    self.stats.sells_staged.fetch_add(1, Ordering::Relaxed);
                    info!(deal_id, buy_order = buy.id, sell_order = placed.id, "sell staged after buy fill");
                }
                Err(e) => {
                    self.stats.staging_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(deal_id, buy_order = buy.id, error = %e, "failed to stage sell after buy fill");
                }
            }
            processed.insert(buy.id);
        }
    }
}
