//! Exchange Gateway (C4, §4.4): the abstract capability set the core consumes
//! to talk to a real exchange, kept behind a trait so the core stays
//! exchange-agnostic.

pub mod coindcx;

use std::collections::HashMap;

use tokio::sync::mpsc::Receiver;

use crate::error::EngineResult;
use crate::money::Money;
use crate::types::{CurrencyPair, ExchangeRecord, OrderBookSnapshot, Side, Symbol, Tick};
use crate::oms::types::OrderKind;

/// Free / total / used balance for one currency (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct Balance {
    pub free: Money,
    pub total: Money,
    pub used: Money,
}

/// The capability set consumed by the core (§4.4). Implementations are
/// generic parameters rather than trait objects, so methods can stay native
/// `async fn` without boxing.
pub trait ExchangeGateway: Send + Sync {
    fn create_order(
        &self,
        symbol: &Symbol,
        side: Side,
        kind: OrderKind,
        amount: Money,
        price: Option<Money>,
    ) -> impl std::future::Future<Output = EngineResult<ExchangeRecord>> + Send;

    fn cancel_order(
        &self,
        exchange_id: &str,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = EngineResult<ExchangeRecord>> + Send;

    fn fetch_order(
        &self,
        exchange_id: &str,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = EngineResult<ExchangeRecord>> + Send;

    fn fetch_open_orders(
        &self,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = EngineResult<Vec<ExchangeRecord>>> + Send;

    fn fetch_balance(
        &self,
    ) -> impl std::future::Future<Output = EngineResult<HashMap<String, Balance>>> + Send;

    fn fetch_ticker(
        &self,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = EngineResult<Tick>> + Send;

    fn fetch_order_book(
        &self,
        symbol: &Symbol,
        depth: usize,
    ) -> impl std::future::Future<Output = EngineResult<OrderBookSnapshot>> + Send;

    /// Spawns a background poller and streams snapshots over the channel.
    /// Dropping the receiver cancels the subscription.
    fn watch_ticker(&self, symbol: &Symbol) -> Receiver<Tick>;

    /// Spawns a background poller and streams snapshots over the channel.
    fn watch_order_book(&self, symbol: &Symbol, depth: usize) -> Receiver<OrderBookSnapshot>;

    fn get_symbol_info(
        &self,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = EngineResult<CurrencyPair>> + Send;
}
