//! In-memory Deal & Order Store with multi-key indexes (C2, §4.2).
//!
//! Every mutation goes through `save`/`save_deal` so the secondary indexes stay
//! coherent with the primary maps (§8 I7). A global per-store lock around each
//! read-modify-write unit is sufficient given the low contention the trading
//! loop and supervisors produce (§5).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::{DashMap, DashSet};

use crate::oms::types::{Deal, DealId, Order, OrderId, OrderStatus};
use crate::types::Symbol;

/// How long an OPEN order may go without a status refresh before it is
/// considered to require a sync pass (§4.2 `get_orders_requiring_sync`).
const SYNC_STALENESS: Duration = Duration::minutes(5);

/// Filters accepted by `search_orders` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub symbol: Option<Symbol>,
    pub status: Option<OrderStatus>,
    pub deal_id: Option<DealId>,
}

/// Per-deal logical lock (§5): supervisors acquire this before transitioning a
/// deal's orders. Acquisition failure means "some other supervisor is working
/// on it — skip this iteration" rather than block. Dropping the guard releases
/// the lock.
pub struct DealLock {
    deal_id: DealId,
    locked: Arc<DashSet<DealId>>,
}

impl Drop for DealLock {
    fn drop(&mut self) {
        self.locked.remove(&self.deal_id);
    }
}

pub struct DealStore {
    orders_by_id: DashMap<OrderId, Order>,
    orders_by_exchange_id: DashMap<String, OrderId>,
    orders_by_symbol: DashMap<Symbol, HashSet<OrderId>>,
    orders_by_deal: DashMap<DealId, HashSet<OrderId>>,
    orders_by_status: DashMap<OrderStatus, HashSet<OrderId>>,

    deals_by_id: DashMap<DealId, Deal>,
    locked_deals: Arc<DashSet<DealId>>,
}

impl DealStore {
    pub fn new() -> Self {
        Self {
            orders_by_id: DashMap::new(),
            orders_by_exchange_id: DashMap::new(),
            orders_by_symbol: DashMap::new(),
            orders_by_deal: DashMap::new(),
            orders_by_status: DashMap::new(),
            deals_by_id: DashMap::new(),
            locked_deals: Arc::new(DashSet::new()),
        }
    }

    // -- orders ------------------------------------------------------------

    /// Persist `order`, atomically reconciling every secondary index against
    /// its previous state (§4.2 invariants).
    pub fn save(&self, order: Order) {
        let id = order.id;

        if let Some(previous) = self.orders_by_id.get(&id) {
            if previous.status != order.status {
                if let Some(mut set) = self.orders_by_status.get_mut(&previous.status) {
                    set.remove(&id);
                }
            }
            if previous.exchange_id != order.exchange_id {
                if let Some(old_ex) = &previous.exchange_id {
                    self.orders_by_exchange_id.remove(old_ex);
                }
            }
        }

        self.orders_by_symbol
            .entry(order.symbol.clone())
            .or_default()
            .insert(id);

        if let Some(deal_id) = order.deal_id {
            self.orders_by_deal.entry(deal_id).or_default().insert(id);
        }

        self.orders_by_status
            .entry(order.status)
            .or_default()
            .insert(id);

        if let Some(exchange_id) = &order.exchange_id {
            self.orders_by_exchange_id
                .insert(exchange_id.clone(), id);
        }

        self.orders_by_id.insert(id, order);
    }

    pub fn get_by_id(&self, id: OrderId) -> Option<Order> {
        self.orders_by_id.get(&id).map(|r| r.clone())
    }

    pub fn get_by_exchange_id(&self, exchange_id: &str) -> Option<Order> {
        let id = *self.orders_by_exchange_id.get(exchange_id)?;
        self.get_by_id(id)
    }

    pub fn get_all_by_deal(&self, deal_id: DealId) -> Vec<Order> {
        match self.orders_by_deal.get(&deal_id) {
            Some(ids) => ids.iter().filter_map(|id| self.get_by_id(*id)).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_open_orders(&self) -> Vec<Order> {
        let mut result = self.get_orders_by_status(OrderStatus::Open);
        result.extend(self.get_orders_by_status(OrderStatus::PartiallyFilled));
        result
    }

    pub fn get_orders_by_symbol(&self, symbol: &Symbol) -> Vec<Order> {
        match self.orders_by_symbol.get(symbol) {
            Some(ids) => ids.iter().filter_map(|id| self.get_by_id(*id)).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_orders_by_status(&self, status: OrderStatus) -> Vec<Order> {
        match self.orders_by_status.get(&status) {
            Some(ids) => ids.iter().filter_map(|id| self.get_by_id(*id)).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_pending_orders(&self) -> Vec<Order> {
        self.get_orders_by_status(OrderStatus::Pending)
    }

    /// Bulk status transition, used by `sync_open_orders` (C5) after a diff
    /// against the exchange's open-order set.
    pub fn bulk_update_status(&self, ids: &[OrderId], status: OrderStatus) {
        for &id in ids {
            if let Some(mut order) = self.get_by_id(id) {
                order.status = status;
                order.last_update = Utc::now();
                if status.is_terminal() {
                    order.closed_at = Some(order.last_update);
                }
                self.save(order);
            }
        }
    }

    /// Evict closed orders older than `older_than_days`. Per §4.2, capacity
    /// pressure evicts only the oldest 10% of **closed** orders, never open
    /// ones; this helper performs an unconditional age-based sweep used at
    /// whatever cadence the caller chooses.
    pub fn delete_old_orders(&self, older_than_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let doomed: Vec<OrderId> = self
            .orders_by_id
            .iter()
            .filter(|entry| entry.status.is_terminal() && entry.created_at < cutoff)
            .map(|entry| entry.id)
            .collect();
        for id in &doomed {
            self.remove_order(*id);
        }
        doomed.len()
    }

    /// Evict the oldest 10% of closed orders when capacity is reached (§4.2).
    pub fn evict_oldest_closed(&self, capacity: usize) -> usize {
        if self.orders_by_id.len() <= capacity {
            return 0;
        }
        let mut closed: Vec<Order> = self
            .orders_by_id
            .iter()
            .filter(|e| e.status.is_terminal())
            .map(|e| e.clone())
            .collect();
        closed.sort_by_key(|o| o.created_at);
        let evict_count = closed.len() / 10;
        for order in closed.into_iter().take(evict_count) {
            self.remove_order(order.id);
        }
        evict_count
    }

    fn remove_order(&self, id: OrderId) {
        if let Some((_, order)) = self.orders_by_id.remove(&id) {
            if let Some(mut set) = self.orders_by_status.get_mut(&order.status) {
                set.remove(&id);
            }
            if let Some(mut set) = self.orders_by_symbol.get_mut(&order.symbol) {
                set.remove(&id);
            }
            if let Some(deal_id) = order.deal_id {
                if let Some(mut set) = self.orders_by_deal.get_mut(&deal_id) {
                    set.remove(&id);
                }
            }
            if let Some(exchange_id) = &order.exchange_id {
                self.orders_by_exchange_id.remove(exchange_id);
            }
        }
    }

    pub fn search_orders(&self, filter: &OrderFilter) -> Vec<Order> {
        self.orders_by_id
            .iter()
            .filter(|entry| {
                filter
                    .symbol
                    .as_ref()
                    .map_or(true, |s| &entry.symbol == s)
                    && filter.status.map_or(true, |s| entry.status == s)
                    && filter.deal_id.map_or(true, |d| entry.deal_id == Some(d))
            })
            .map(|e| e.clone())
            .collect()
    }

    /// Open orders with an `exchange_id` whose last update predates the sync
    /// staleness window (§4.2).
    pub fn get_orders_requiring_sync(&self) -> Vec<Order> {
        let cutoff = Utc::now() - SYNC_STALENESS;
        self.get_open_orders()
            .into_iter()
            .filter(|o| o.exchange_id.is_some() && o.last_update < cutoff)
            .collect()
    }

    /// Rebuild every secondary index from the primary map (§4.2 recovery path).
    pub fn rebuild_indexes(&self) {
        self.orders_by_exchange_id.clear();
        self.orders_by_symbol.clear();
        self.orders_by_deal.clear();
        self.orders_by_status.clear();

        for entry in self.orders_by_id.iter() {
            let order = entry.value();
            self.orders_by_symbol
                .entry(order.symbol.clone())
                .or_default()
                .insert(order.id);
            self.orders_by_status
                .entry(order.status)
                .or_default()
                .insert(order.id);
            if let Some(deal_id) = order.deal_id {
                self.orders_by_deal.entry(deal_id).or_default().insert(order.id);
            }
            if let Some(exchange_id) = &order.exchange_id {
                self.orders_by_exchange_id
                    .insert(exchange_id.clone(), order.id);
            }
        }
    }

    // -- deals ---------------------------------------------------------------

    pub fn save_deal(&self, deal: Deal) {
        self.deals_by_id.insert(deal.id, deal);
    }

    pub fn get_deal(&self, deal_id: DealId) -> Option<Deal> {
        self.deals_by_id.get(&deal_id).map(|r| r.clone())
    }

    pub fn get_open_deals(&self) -> Vec<Deal> {
        self.deals_by_id
            .iter()
            .filter(|e| e.is_open())
            .map(|e| e.clone())
            .collect()
    }

    pub fn open_deal_count(&self, symbol: &Symbol) -> usize {
        self.deals_by_id
            .iter()
            .filter(|e| e.is_open() && &e.symbol == symbol)
            .count()
    }

    /// Best-effort per-deal lock (§5): `None` means another supervisor holds
    /// it; the caller should skip this deal this iteration, not block.
    pub fn try_lock_deal(&self, deal_id: DealId) -> Option<DealLock> {
        if self.locked_deals.insert(deal_id) {
            Some(DealLock {
                deal_id,
                locked: self.locked_deals.clone(),
            })
        } else {
            None
        }
    }
}

impl Default for DealStore {
    fn default() -> Self {
        Self::new()
    }
}
