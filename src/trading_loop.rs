//! Trading Loop (C15, §4.15): the single-threaded outer coordinator that
//! drives one currency pair from ticker to executed deal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::coordinator::ExecutionCoordinator;
use crate::deal_service::DealService;
use crate::exchange::ExchangeGateway;
use crate::order_service::OrderService;
use crate::orderbook::{BookSignal, OrderBookAnalyzer};
use crate::signal::{Signal, SignalGenerator};
use crate::strategy_calc::StrategyCalculator;
use crate::supervisors::{DealCompletionMonitor, FilledBuyHandler, StaleBuyMonitor, TieredStopLoss};
use crate::types::{CurrencyPair, OrderBookSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct TradingLoopConfig {
    pub orderbook_update_interval_ticks: u64,
    pub filled_buy_interval_ticks: u64,
    pub deal_completion_interval_ticks: u64,
    pub supervisor_stats_interval_ticks: u64,
    pub error_backoff: Duration,
}

impl Default for TradingLoopConfig {
    fn default() -> Self {
        Self {
            orderbook_update_interval_ticks: 10,
            filled_buy_interval_ticks: 50,
            deal_completion_interval_ticks: 50,
            supervisor_stats_interval_ticks: 500,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Drives a single pair end to end. One instance per traded pair (§5).
pub struct TradingLoop<G: ExchangeGateway> {
    pair: CurrencyPair,
    gateway: Arc<G>,
    orders: Arc<OrderService<G>>,
    deals: Arc<DealService<G>>,
    coordinator: Arc<ExecutionCoordinator<G>>,
    analyzer: OrderBookAnalyzer,
    signal_gen: SignalGenerator,
    stale_buy: Arc<StaleBuyMonitor<G>>,
    filled_buy: Arc<FilledBuyHandler<G>>,
    deal_completion: Arc<DealCompletionMonitor<G>>,
    stop_loss: Arc<TieredStopLoss<G>>,
    config: TradingLoopConfig,
    shutdown: Arc<AtomicBool>,
}

impl<G: ExchangeGateway> TradingLoop<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: CurrencyPair,
        gateway: Arc<G>,
        orders: Arc<OrderService<G>>,
        deals: Arc<DealService<G>>,
        coordinator: Arc<ExecutionCoordinator<G>>,
        analyzer: OrderBookAnalyzer,
        stale_buy: Arc<StaleBuyMonitor<G>>,
        filled_buy: Arc<FilledBuyHandler<G>>,
        deal_completion: Arc<DealCompletionMonitor<G>>,
        stop_loss: Arc<TieredStopLoss<G>>,
        config: TradingLoopConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            signal_gen: SignalGenerator::new(200),
            pair,
            gateway,
            orders,
            deals,
            coordinator,
            analyzer,
            stale_buy,
            filled_buy,
            deal_completion,
            stop_loss,
            config,
            shutdown,
        }
    }

    /// Runs until `shutdown` is set, then emergency-cancels open orders.
    pub async fn run(&mut self) {
        let mut ticker_rx = self.gateway.watch_ticker(&self.pair.symbol);
        let mut cached_book: Option<OrderBookSnapshot> = None;
        let mut tick_count: u64 = 0;
        let mut last_stop_loss_check = Instant::now();

        // C11 runs on its own timer (§4.11, default 60 s), independent of how
        // often tickers arrive — unlike C12/C13 it is not driven by tick count.
        let stale_buy_handle = {
            let stale_buy = Arc::clone(&self.stale_buy);
            let pair = self.pair.clone();
            let period = stale_buy.check_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    stale_buy.run_once(&pair).await;
                }
            })
        };

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let tick = match ticker_rx.recv().await {
                Some(t) => t,
                None => {
                    warn!(symbol = %self.pair.symbol, "ticker stream closed, stopping loop");
                    break;
                }
            };

            tick_count += 1;
            let signal = self.signal_gen.on_tick(tick);

            if tick_count % self.config.orderbook_update_interval_ticks == 0 {
                match self.gateway.fetch_order_book(&self.pair.symbol, 20).await {
                    Ok(snapshot) => cached_book = Some(snapshot),
                    Err(e) => {
                        warn!(symbol = %self.pair.symbol, error = %e, "order-book refresh failed");
                        sleep(self.config.error_backoff).await;
                    }
                }
            }

            if signal == Signal::Buy {
                if let Err(e) = self.on_buy_signal(tick).await {
                    error!(symbol = %self.pair.symbol, error = %e, "buy-signal pipeline aborted");
                    sleep(self.config.error_backoff).await;
                }
            }

            if tick_count % self.config.filled_buy_interval_ticks == 0 {
                self.filled_buy.run_once().await;
            }
            if tick_count % self.config.deal_completion_interval_ticks == 0 {
                self.deal_completion.run_once().await;
            }
            if cached_book.is_some() && last_stop_loss_check.elapsed() >= self.stop_loss.check_interval() {
                self.stop_loss.run_once(&self.pair).await;
                last_stop_loss_check = Instant::now();
            }
            if tick_count % self.config.supervisor_stats_interval_ticks == 0 {
                info!(symbol = %self.pair.symbol, ticks = tick_count, "supervisor sweep complete");
            }
        }

        info!(symbol = %self.pair.symbol, "shutdown signal received, cancelling open orders");
        self.orders.emergency_cancel_all(Some(&self.pair.symbol)).await;
        stale_buy_handle.abort();
    }

    async fn on_buy_signal(&self, tick: crate::types::Tick) -> crate::error::EngineResult<()> {
        let snapshot = self.gateway.fetch_order_book(&self.pair.symbol, 20).await?;
        let analysis = self.analyzer.analyze(&snapshot);
        if matches!(analysis.signal, BookSignal::Reject | BookSignal::WeakSell | BookSignal::StrongSell) {
            return Ok(());
        }

        self.orders.sync_open_orders(Some(&self.pair.symbol)).await?;

        let open_deals = self.deals.open_deal_count(&self.pair.symbol);
        if open_deals >= self.pair.deal_count {
            return Ok(());
        }

        let (sufficient, _free, message) = self.deals.check_balance(&self.pair.quote, self.pair.deal_quota).await?;
        if !sufficient {
            warn!(symbol = %self.pair.symbol, message, "skipping buy signal, insufficient balance");
            return Ok(());
        }

        let output = match StrategyCalculator::compute(
            tick.last,
            self.pair.deal_quota,
            &self.pair,
            self.pair.profit_markup,
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!(symbol = %self.pair.symbol, error = %e, "strategy computation rejected buy signal");
                return Ok(());
            }
        };

        self.coordinator.execute_strategy(&self.pair, output, &tick).await?;
        Ok(())
    }
}
