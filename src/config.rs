//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::coordinator::ExecutionGuardConfig;
use crate::money::Money;
use crate::orderbook::AnalyzerConfig;
use crate::supervisors::stale_buy::StaleBuyConfig;
use crate::supervisors::stop_loss::StopLossConfig;
use crate::types::{CurrencyPair, Symbol};

/// Top-level engine configuration, loaded once at the binary's edge (§10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub exchange: ExchangeConfig,
    pub pairs: Vec<CurrencyPairConfig>,
    pub buy_order_monitor: StaleBuyMonitorConfig,
    pub orderbook_analyzer: OrderBookAnalyzerConfig,
    pub risk_management: RiskManagementConfig,
    pub execution: ExecutionConfig,
    pub loop_cadence: LoopCadenceConfig,
}

impl EngineConfig {
    /// Load from JSON file, then overlay API credentials from environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("failed to read config file")?;
        let mut config: EngineConfig =
            serde_json::from_str(&contents).context("failed to parse config JSON")?;

        if let Ok(api_key) = std::env::var("EXCHANGE_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("EXCHANGE_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }

        Ok(config)
    }

    pub fn currency_pairs(&self) -> Vec<CurrencyPair> {
        self.pairs.iter().map(CurrencyPairConfig::to_currency_pair).collect()
    }
}

/// Exchange credentials, rate limiting, and timeouts (§10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub max_requests_per_second: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            max_requests_per_second: 10,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// JSON-friendly mirror of `CurrencyPair` (§4.0, §6): float fields round-trip
/// through `Money::from_f64` at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyPairConfig {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_tick: f64,
    pub amount_step: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub min_notional: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub deal_quota: f64,
    pub deal_count: usize,
    pub profit_markup: f64,
    pub order_life_time_minutes: i64,
}

impl CurrencyPairConfig {
    pub fn to_currency_pair(&self) -> CurrencyPair {
        CurrencyPair {
            symbol: Symbol::new(self.symbol.clone()),
            base: self.base.clone(),
            quote: self.quote.clone(),
            price_tick: Money::from_f64(self.price_tick),
            amount_step: Money::from_f64(self.amount_step),
            min_amount: Money::from_f64(self.min_amount),
            max_amount: Money::from_f64(self.max_amount),
            min_notional: Money::from_f64(self.min_notional),
            maker_fee: Money::from_f64(self.maker_fee),
            taker_fee: Money::from_f64(self.taker_fee),
            deal_quota: Money::from_f64(self.deal_quota),
            deal_count: self.deal_count,
            profit_markup: Money::from_f64(self.profit_markup),
            order_life_time_minutes: self.order_life_time_minutes,
        }
    }
}

/// Mirrors `StaleBuyConfig` (C11, §4.11).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaleBuyMonitorConfig {
    pub max_age_minutes: i64,
    pub max_price_deviation_percent: f64,
    pub check_interval_seconds: u64,
    pub max_recreations_per_deal: u32,
    pub min_time_between_recreations_minutes: i64,
}

impl Default for StaleBuyMonitorConfig {
    fn default() -> Self {
        let defaults = StaleBuyConfig::default();
        Self {
            max_age_minutes: defaults.max_age_minutes,
            max_price_deviation_percent: defaults.max_price_deviation_percent,
            check_interval_seconds: defaults.check_interval_seconds,
            max_recreations_per_deal: defaults.max_recreations_per_deal,
            min_time_between_recreations_minutes: defaults.min_time_between_recreations_minutes,
        }
    }
}

impl From<StaleBuyMonitorConfig> for StaleBuyConfig {
    fn from(c: StaleBuyMonitorConfig) -> Self {
        StaleBuyConfig {
            max_age_minutes: c.max_age_minutes,
            max_price_deviation_percent: c.max_price_deviation_percent,
            check_interval_seconds: c.check_interval_seconds,
            max_recreations_per_deal: c.max_recreations_per_deal,
            min_time_between_recreations_minutes: c.min_time_between_recreations_minutes,
        }
    }
}

/// Mirrors `AnalyzerConfig` (C7, §4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookAnalyzerConfig {
    pub min_liquidity_depth: usize,
    pub max_spread_percent: f64,
    pub typical_order_size: f64,
    pub big_wall_threshold: f64,
    pub support_resistance_max_pct: f64,
}

impl Default for OrderBookAnalyzerConfig {
    fn default() -> Self {
        let defaults = AnalyzerConfig::default();
        Self {
            min_liquidity_depth: defaults.min_liquidity_depth,
            max_spread_percent: defaults.max_spread_percent,
            typical_order_size: defaults.typical_order_size.to_f64(),
            big_wall_threshold: defaults.big_wall_threshold.to_f64(),
            support_resistance_max_pct: defaults.support_resistance_max_pct,
        }
    }
}

impl From<OrderBookAnalyzerConfig> for AnalyzerConfig {
    fn from(c: OrderBookAnalyzerConfig) -> Self {
        AnalyzerConfig {
            min_liquidity_depth: c.min_liquidity_depth,
            max_spread_percent: c.max_spread_percent,
            typical_order_size: Money::from_f64(c.typical_order_size),
            big_wall_threshold: Money::from_f64(c.big_wall_threshold),
            support_resistance_max_pct: c.support_resistance_max_pct,
        }
    }
}

/// Mirrors `StopLossConfig`'s drawdown tiers (C14, §4.14).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmartStopLossConfig {
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub emergency_percent: f64,
}

/// Mirrors `StopLossConfig` (C14, §4.14), per §6's `risk_management` schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskManagementConfig {
    pub enable_stop_loss: bool,
    pub stop_loss_check_interval_seconds: u64,
    pub smart_stop_loss: SmartStopLossConfig,
    pub critical_volume_imbalance_threshold: f64,
    pub critical_slippage_percent: f64,
}

impl Default for RiskManagementConfig {
    fn default() -> Self {
        let defaults = StopLossConfig::default();
        Self {
            enable_stop_loss: defaults.enable_stop_loss,
            stop_loss_check_interval_seconds: defaults.stop_loss_check_interval_seconds,
            smart_stop_loss: SmartStopLossConfig {
                warning_percent: defaults.warning_drawdown_percent,
                critical_percent: defaults.critical_drawdown_percent,
                emergency_percent: defaults.emergency_drawdown_percent,
            },
            critical_volume_imbalance_threshold: defaults.critical_volume_imbalance_threshold,
            critical_slippage_percent: defaults.critical_slippage_percent,
        }
    }
}

impl From<RiskManagementConfig> for StopLossConfig {
    fn from(c: RiskManagementConfig) -> Self {
        StopLossConfig {
            enable_stop_loss: c.enable_stop_loss,
            stop_loss_check_interval_seconds: c.stop_loss_check_interval_seconds,
            warning_drawdown_percent: c.smart_stop_loss.warning_percent,
            critical_drawdown_percent: c.smart_stop_loss.critical_percent,
            emergency_drawdown_percent: c.smart_stop_loss.emergency_percent,
            critical_volume_imbalance_threshold: c.critical_volume_imbalance_threshold,
            critical_slippage_percent: c.critical_slippage_percent,
        }
    }
}

/// Mirrors `ExecutionGuardConfig` (C10, §4.10), per §6's `execution` schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_execution_time_sec: u64,
    pub enable_risk_checks: bool,
    pub enable_balance_checks: bool,
    pub enable_slippage_protection: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let defaults = ExecutionGuardConfig::default();
        Self {
            max_execution_time_sec: defaults.max_execution_time_sec,
            enable_risk_checks: defaults.enable_risk_checks,
            enable_balance_checks: defaults.enable_balance_checks,
            enable_slippage_protection: defaults.enable_slippage_protection,
        }
    }
}

impl From<ExecutionConfig> for ExecutionGuardConfig {
    fn from(c: ExecutionConfig) -> Self {
        ExecutionGuardConfig {
            max_execution_time_sec: c.max_execution_time_sec,
            enable_risk_checks: c.enable_risk_checks,
            enable_balance_checks: c.enable_balance_checks,
            enable_slippage_protection: c.enable_slippage_protection,
        }
    }
}

/// Trading-loop cadence (§4.15) — implementation-level tick intervals, not
/// part of §6's enumerated configuration sections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopCadenceConfig {
    pub orderbook_update_interval_ticks: u64,
    pub filled_buy_interval_ticks: u64,
    pub deal_completion_interval_ticks: u64,
    pub supervisor_stats_interval_ticks: u64,
    pub error_backoff_secs: u64,
}

impl Default for LoopCadenceConfig {
    fn default() -> Self {
        Self {
            orderbook_update_interval_ticks: 10,
            filled_buy_interval_ticks: 50,
            deal_completion_interval_ticks: 50,
            supervisor_stats_interval_ticks: 500,
            error_backoff_secs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_pair_config_round_trips_through_money() {
        let cfg = CurrencyPairConfig {
            symbol: "ETH/USDT".into(),
            base: "ETH".into(),
            quote: "USDT".into(),
            price_tick: 0.01,
            amount_step: 0.0001,
            min_amount: 0.0001,
            max_amount: 1000.0,
            min_notional: 10.0,
            maker_fee: 0.001,
            taker_fee: 0.001,
            deal_quota: 100.0,
            deal_count: 5,
            profit_markup: 0.005,
            order_life_time_minutes: 15,
        };
        let pair = cfg.to_currency_pair();
        assert_eq!(pair.symbol.as_str(), "ETH/USDT");
        assert_eq!(pair.price_tick.to_f64(), 0.01);
    }

    #[test]
    fn test_exchange_config_defaults() {
        let cfg = ExchangeConfig::default();
        assert_eq!(cfg.max_requests_per_second, 10);
        assert!(cfg.api_key.is_none());
    }
}
