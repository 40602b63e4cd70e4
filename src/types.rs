//! Core data types shared across the engine (§3): symbols, pairs, ticks, and the
//! exchange-record contract the gateway adapter must honor (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Trading pair symbol using `Arc<str>` for cheap cloning.
///
/// Symbols are frequently cloned when passed between the store, supervisors,
/// and the trading loop. `Arc<str>` makes that an O(1) refcount bump instead
/// of a heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// Order / deal side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A tradable market (§3). Precision fields are refreshed from the exchange at
/// startup (`ExchangeGateway::get_symbol_info`) and treated as immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub symbol: Symbol,
    pub base: String,
    pub quote: String,

    pub price_tick: Money,
    pub amount_step: Money,
    pub min_amount: Money,
    pub max_amount: Money,
    pub min_notional: Money,
    pub maker_fee: Money,
    pub taker_fee: Money,

    pub deal_quota: Money,
    pub deal_count: usize,
    pub profit_markup: Money,
    pub order_life_time_minutes: i64,
}

impl CurrencyPair {
    /// §3 invariants: `price_tick > 0`, `amount_step > 0`, `min_notional > 0`.
    pub fn validate(&self) -> Result<(), String> {
        if !self.price_tick.is_positive() {
            return Err(format!("{}: price_tick must be > 0", self.symbol));
        }
        if !self.amount_step.is_positive() {
            return Err(format!("{}: amount_step must be > 0", self.symbol));
        }
        if !self.min_notional.is_positive() {
            return Err(format!("{}: min_notional must be > 0", self.symbol));
        }
        Ok(())
    }
}

/// A single market-data observation (§3 `PriceWindow` element).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub last: Money,
    pub bid: Money,
    pub ask: Money,
    pub volume: Money,
}

/// A bounded, ordered sequence of recent ticks (§3). Oldest evicted on overflow.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    capacity: usize,
    ticks: std::collections::VecDeque<Tick>,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ticks: std::collections::VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn push(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.ticks.iter().map(|t| t.last.to_f64()).collect()
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }
}

/// One price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Level {
    pub price: Money,
    pub size: Money,
}

/// A raw order-book snapshot (§3): bids descending, asks ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

// ============================================================================
// Exchange-record contract (§6)
// ============================================================================

/// Status as reported by the exchange, prior to local mapping (§4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeOrderStatus {
    Open,
    Closed,
    Canceled,
    Expired,
    Rejected,
}

/// Exchange fee breakdown, optional on a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeFee {
    pub cost: Money,
    pub currency: String,
    pub rate: Option<Money>,
}

/// The contract every `ExchangeGateway` response MUST satisfy (§4.4, §6). The
/// core reads only these typed fields; `info` is preserved verbatim for
/// forensic purposes and is never consulted for logic (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: String,
    pub client_order_id: Option<String>,
    pub timestamp: i64,
    pub datetime: DateTime<Utc>,
    pub last_trade_timestamp: Option<i64>,
    pub status: ExchangeOrderStatus,
    pub symbol: Symbol,
    pub kind: String,
    pub time_in_force: Option<String>,
    pub side: Side,
    pub price: Money,
    pub amount: Money,
    pub filled: Money,
    pub remaining: Money,
    pub cost: Option<Money>,
    pub average: Option<Money>,
    pub fee: Option<ExchangeFee>,
    pub info: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_window_evicts_oldest() {
        let mut window = PriceWindow::new(2);
        let t = |last: f64| Tick {
            timestamp: Utc::now(),
            last: Money::from_f64(last),
            bid: Money::from_f64(last),
            ask: Money::from_f64(last),
            volume: Money::ZERO,
        };
        window.push(t(1.0));
        window.push(t(2.0));
        window.push(t(3.0));
        assert_eq!(window.len(), 2);
        assert_eq!(window.closes(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_currency_pair_validation() {
        let mut pair = CurrencyPair {
            symbol: Symbol::new("ETH/USDT"),
            base: "ETH".into(),
            quote: "USDT".into(),
            price_tick: Money::from_f64(0.01),
            amount_step: Money::from_f64(0.0001),
            min_amount: Money::ZERO,
            max_amount: Money::from_f64(1000.0),
            min_notional: Money::from_f64(10.0),
            maker_fee: Money::from_f64(0.001),
            taker_fee: Money::from_f64(0.001),
            deal_quota: Money::from_f64(100.0),
            deal_count: 5,
            profit_markup: Money::from_f64(0.005),
            order_life_time_minutes: 15,
        };
        assert!(pair.validate().is_ok());
        pair.price_tick = Money::ZERO;
        assert!(pair.validate().is_err());
    }
}
