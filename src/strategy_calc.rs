//! Strategy Calculator (C9, §4.9): turns a buy signal into concrete buy/sell
//! order parameters, all arithmetic in exact decimal.

use crate::error::{EngineError, EngineResult};
use crate::money::{quantize, QuantizeMode};
use crate::types::CurrencyPair;

#[derive(Debug, Clone)]
pub struct StrategyOutput {
    pub buy_price: crate::money::Money,
    pub coins_to_buy: crate::money::Money,
    pub sell_price: crate::money::Money,
    pub coins_to_sell: crate::money::Money,
    pub info: String,
}

pub struct StrategyCalculator;

impl StrategyCalculator {
    pub fn compute(
        buy_price: crate::money::Money,
        budget: crate::money::Money,
        pair: &CurrencyPair,
        profit_markup: crate::money::Money,
    ) -> EngineResult<StrategyOutput> {
        if budget < pair.min_notional {
            return Err(EngineError::validation(
                "budget",
                format!("{budget} below min_notional {}", pair.min_notional),
            ));
        }

        let raw_coins = budget / buy_price;
        let coins_to_buy = quantize(raw_coins, pair.amount_step, QuantizeMode::Ceil)?;

        let one = crate::money::Money::ONE;
        let coins_after_buy_fee = coins_to_buy * (one - pair.taker_fee);

        let sell_price_raw = buy_price * (one + profit_markup) / (one - pair.taker_fee);
        let sell_price = quantize(sell_price_raw, pair.price_tick, QuantizeMode::HalfUp)?;

        let coins_to_sell = quantize(coins_after_buy_fee, pair.amount_step, QuantizeMode::Floor)?;

        let notional = coins_to_buy * buy_price;
        if notional < pair.min_notional {
            return Err(EngineError::validation(
                "notional",
                format!("{notional} below min_notional {}", pair.min_notional),
            ));
        }

        Ok(StrategyOutput {
            buy_price,
            coins_to_buy,
            sell_price,
            coins_to_sell,
            info: format!(
                "budget={budget} buy_price={buy_price} coins_to_buy={coins_to_buy} sell_price={sell_price} coins_to_sell={coins_to_sell}"
            ),
        })
    }
}
