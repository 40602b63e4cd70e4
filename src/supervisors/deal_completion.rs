//! Deal-Completion Monitor (C13, §4.13): closes deals whose buy and sell have
//! both filled. Never mutates order state itself — that's C5/C6's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::deal_service::DealService;
use crate::exchange::ExchangeGateway;
use crate::oms::store::DealStore;

#[derive(Debug, Default)]
pub struct DealCompletionStats {
    pub checks: AtomicU64,
    pub deals_closed: AtomicU64,
}

pub struct DealCompletionMonitor<G: ExchangeGateway> {
    store: Arc<DealStore>,
    deals: Arc<DealService<G>>,
    stats: DealCompletionStats,
}

impl<G: ExchangeGateway> DealCompletionMonitor<G> {
    pub fn new(store: Arc<DealStore>, deals: Arc<DealService<G>>) -> Self {
        Self {
            store,
            deals,
            stats: DealCompletionStats::default(),
        }
    }

    /// One pass over every open deal.
    pub async fn run_once(&self) {
        let open_deals = self.store.get_open_deals();
        let mut closed_this_pass = 0u64;

        for deal in &open_deals {
            self.stats.checks.fetch_add(1, Ordering::Relaxed);

            match self.deals.close_if_completed(deal).await {
                Ok(Some(_)) => {
                    closed_this_pass += 1;
                    self.stats.deals_closed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(deal_id = deal.id, error = %e, "deal-completion check failed");
                }
            }
        }

        info!(open = open_deals.len(), closed = closed_this_pass, "deal-completion sweep finished");
    }
}
