//! Order Execution Coordinator (C10, §4.10): the single entry point that
//! turns a strategy output into a live deal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::deal_service::DealService;
use crate::error::{EngineError, EngineResult};
use crate::exchange::ExchangeGateway;
use crate::money::Money;
use crate::oms::types::{Deal, Order, OrderKind};
use crate::order_service::OrderService;
use crate::strategy_calc::StrategyOutput;
use crate::types::{CurrencyPair, Tick};

/// Per-execution guards (§6 `execution`): which checks run and the overall
/// deadline for one `execute_strategy` call.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionGuardConfig {
    pub max_execution_time_sec: u64,
    pub enable_risk_checks: bool,
    pub enable_balance_checks: bool,
    pub enable_slippage_protection: bool,
}

impl Default for ExecutionGuardConfig {
    fn default() -> Self {
        Self {
            max_execution_time_sec: 30,
            enable_risk_checks: true,
            enable_balance_checks: true,
            enable_slippage_protection: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub total_executions: AtomicU64,
    pub successful_executions: AtomicU64,
    pub total_volume: std::sync::Mutex<Money>,
}

pub struct ExecutionCoordinator<G: ExchangeGateway> {
    orders: Arc<OrderService<G>>,
    deals: Arc<DealService<G>>,
    config: ExecutionGuardConfig,
    stats: ExecutionStats,
}

pub struct ExecutionOutcome {
    pub deal: Deal,
    pub buy_order: Order,
    pub sell_order: Order,
    pub warnings: Vec<String>,
}

impl<G: ExchangeGateway> ExecutionCoordinator<G> {
    pub fn new(orders: Arc<OrderService<G>>, deals: Arc<DealService<G>>, config: ExecutionGuardConfig) -> Self {
        Self {
            orders,
            deals,
            config,
            stats: ExecutionStats::default(),
        }
    }

    fn validate(output: &StrategyOutput) -> EngineResult<()> {
        if !output.coins_to_buy.is_positive() || !output.buy_price.is_positive() {
            return Err(EngineError::validation("strategy_output", "non-positive buy amount or price"));
        }
        if !output.coins_to_sell.is_positive() || !output.sell_price.is_positive() {
            return Err(EngineError::validation("strategy_output", "non-positive sell amount or price"));
        }
        Ok(())
    }

    fn pre_execution_warnings(&self, output: &StrategyOutput, market: &Tick, pair: &CurrencyPair) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.config.enable_slippage_protection {
            let buy_deviation =
                ((output.buy_price - market.last).abs() / market.last * Money::from_f64(100.0)).to_f64();
            if buy_deviation > 5.0 {
                warnings.push(format!("buy price deviates {buy_deviation:.2}% from market"));
            }

            let sell_deviation =
                ((output.sell_price - market.last).abs() / market.last * Money::from_f64(100.0)).to_f64();
            if sell_deviation > 10.0 {
                warnings.push(format!("sell price deviates {sell_deviation:.2}% from market"));
            }
        }

        if self.config.enable_risk_checks && (output.coins_to_buy < pair.min_amount || output.coins_to_buy > pair.max_amount) {
            warnings.push(format!("buy amount {} outside exchange limits", output.coins_to_buy));
        }

        warnings
    }

    /// Performs the full C10 pipeline: validate, warn, create deal, place buy,
    /// stage sell, attach, record stats. Bounded by `max_execution_time_sec` (§6).
    pub async fn execute_strategy(
        &self,
        pair: &CurrencyPair,
        output: StrategyOutput,
        market: &Tick,
    ) -> EngineResult<ExecutionOutcome> {
        let deadline = Duration::from_secs(self.config.max_execution_time_sec);
        match tokio::time::timeout(deadline, self.execute_strategy_inner(pair, output, market)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Transient {
                reason: format!("execution exceeded {}s deadline", self.config.max_execution_time_sec),
            }),
        }
    }

    async fn execute_strategy_inner(
        &self,
        pair: &CurrencyPair,
        output: StrategyOutput,
        market: &Tick,
    ) -> EngineResult<ExecutionOutcome> {
        self.stats.total_executions.fetch_add(1, Ordering::Relaxed);

        Self::validate(&output)?;

        let mut warnings = self.pre_execution_warnings(&output, market, pair);
        if self.config.enable_balance_checks {
            let (sufficient, free, message) = self
                .deals
                .check_balance(&pair.quote, output.coins_to_buy * output.buy_price)
                .await?;
            if !sufficient {
                warnings.push(message.clone());
                warn!(symbol = %pair.symbol, free = %free, "balance check failed, proceeding per spec (warn-only)");
            }
        }

        let deal = self.deals.create_deal(pair);

        let buy_order = match self
            .orders
            .place_buy(pair, output.coins_to_buy, output.buy_price, deal.id, OrderKind::Limit)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!(deal_id = deal.id, error = %e, "buy placement failed");
                return Err(e);
            }
        };

        let sell_order = match self.orders.create_local_sell(pair, output.coins_to_sell, output.sell_price, deal.id) {
            Ok(order) => order,
            Err(e) => {
                warn!(deal_id = deal.id, error = %e, "sell staging failed, emergency-cancelling buy");
                if let Err(cancel_err) = self.orders.cancel(buy_order).await {
                    error!(deal_id = deal.id, error = %cancel_err, "emergency buy cancel also failed");
                }
                return Err(e);
            }
        };

        let mut deal = deal;
        deal.buy_order_id = Some(buy_order.id);
        deal.sell_order_id = Some(sell_order.id);
        self.deals.save_deal_refs(&deal);

        self.stats.successful_executions.fetch_add(1, Ordering::Relaxed);
        {
            let mut total = self.stats.total_volume.lock().unwrap();
            *total += output.coins_to_buy * output.buy_price;
        }

        info!(deal_id = deal.id, symbol = %pair.symbol, "strategy executed");

        Ok(ExecutionOutcome {
            deal,
            buy_order,
            sell_order,
            warnings,
        })
    }

    pub fn total_executions(&self) -> u64 {
        self.stats.total_executions.load(Ordering::Relaxed)
    }

    pub fn successful_executions(&self) -> u64 {
        self.stats.successful_executions.load(Ordering::Relaxed)
    }
}
