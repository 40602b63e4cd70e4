//! Order and Deal domain types (§3).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{Side, Symbol};

pub type OrderId = u64;
pub type DealId = u64;

static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static DEAL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Monotonically non-decreasing internal order id (§3).
pub fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Monotonically non-decreasing internal deal id.
pub fn next_deal_id() -> DealId {
    DEAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
    StopLoss,
    TakeProfit,
}

/// §3 status lifecycle: `PENDING -> OPEN -> (PARTIALLY_FILLED)* -> FILLED | CANCELED | FAILED | NOT_FOUND_ON_EXCHANGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
    NotFoundOnExchange,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Failed
                | OrderStatus::NotFoundOnExchange
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// An intent to trade on one side (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub exchange_id: Option<String>,
    pub client_order_id: Option<String>,

    pub side: Side,
    pub kind: OrderKind,
    pub symbol: Symbol,

    /// Exact decimal; `Money::ZERO` for MARKET orders.
    pub price: Money,
    pub amount: Money,
    pub filled_amount: Money,
    pub remaining_amount: Money,
    pub average_price: Money,
    pub fees: Money,
    pub fee_currency: Option<String>,

    pub status: OrderStatus,
    pub deal_id: Option<DealId>,

    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub exchange_timestamp: Option<i64>,
    pub closed_at: Option<DateTime<Utc>>,

    pub retries: u32,
    pub error_message: Option<String>,
    pub raw_exchange_record: Option<serde_json::Value>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        side: Side,
        kind: OrderKind,
        price: Money,
        amount: Money,
        deal_id: Option<DealId>,
        client_order_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: next_order_id(),
            exchange_id: None,
            client_order_id,
            side,
            kind,
            symbol,
            price,
            amount,
            filled_amount: Money::ZERO,
            remaining_amount: amount,
            average_price: Money::ZERO,
            fees: Money::ZERO,
            fee_currency: None,
            status: OrderStatus::Pending,
            deal_id,
            created_at: now,
            last_update: now,
            exchange_timestamp: None,
            closed_at: None,
            retries: 0,
            error_message: None,
            raw_exchange_record: None,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.side, Side::Buy)
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled)
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// A paired entry+exit lifecycle (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    Open,
    Closed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub symbol: Symbol,
    pub status: DealStatus,
    /// Stored by id, not owned reference (§9): resolved through the store on demand.
    pub buy_order_id: Option<OrderId>,
    pub sell_order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_profit: Option<Money>,
}

impl Deal {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            id: next_deal_id(),
            symbol,
            status: DealStatus::Open,
            buy_order_id: None,
            sell_order_id: None,
            created_at: Utc::now(),
            closed_at: None,
            realized_profit: None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, DealStatus::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_generation_is_monotonic() {
        let a = next_order_id();
        let b = next_order_id();
        assert!(b > a);
    }

    #[test]
    fn test_order_creation_defaults() {
        let order = Order::new(
            Symbol::new("ETH/USDT"),
            Side::Buy,
            OrderKind::Limit,
            Money::from_f64(2500.0),
            Money::from_f64(0.04),
            Some(1),
            None,
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_amount, Money::ZERO);
        assert_eq!(order.remaining_amount, order.amount);
    }

    #[test]
    fn test_deal_starts_open_with_no_orders() {
        let deal = Deal::new(Symbol::new("ETH/USDT"));
        assert!(deal.is_open());
        assert!(deal.buy_order_id.is_none());
        assert!(deal.sell_order_id.is_none());
    }
}
