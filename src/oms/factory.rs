//! Order Factory (C3, §4.3): constructs orders pre-validated against a pair's
//! published limits, adjusting price/amount to the pair's tick/step.

use rand::Rng;

use crate::error::EngineError;
use crate::money::{quantize, QuantizeMode};
use crate::oms::types::{DealId, Order, OrderKind};
use crate::types::{CurrencyPair, Side};

pub struct OrderFactory;

impl OrderFactory {
    /// `<side>_<symbol>_<ms-timestamp>_<random-8>` (§4.3).
    pub fn generate_client_order_id(side: Side, pair: &CurrencyPair) -> String {
        let ms = chrono::Utc::now().timestamp_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!(
            "{}_{}_{}_{}",
            side,
            pair.symbol.as_str().replace('/', ""),
            ms,
            suffix
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        pair: &CurrencyPair,
        side: Side,
        kind: OrderKind,
        amount: crate::money::Money,
        price: crate::money::Money,
        deal_id: Option<DealId>,
        client_order_id: Option<String>,
    ) -> Result<Order, EngineError> {
        let (amount_mode, price_mode) = match side {
            Side::Buy => (QuantizeMode::Ceil, QuantizeMode::Floor),
            Side::Sell => (QuantizeMode::Floor, QuantizeMode::Ceil),
        };

        let adjusted_amount = quantize(amount, pair.amount_step, amount_mode)?;
        let adjusted_price = if matches!(kind, OrderKind::Market) {
            crate::money::Money::ZERO
        } else {
            quantize(price, pair.price_tick, price_mode)?
        };

        if adjusted_amount < pair.min_amount || adjusted_amount > pair.max_amount {
            return Err(EngineError::validation(
                "amount",
                format!(
                    "{} outside [{}, {}] for {}",
                    adjusted_amount, pair.min_amount, pair.max_amount, pair.symbol
                ),
            ));
        }

        if !matches!(kind, OrderKind::Market) {
            let notional = adjusted_amount * adjusted_price;
            if notional < pair.min_notional {
                return Err(EngineError::validation(
                    "notional",
                    format!(
                        "{} below min_notional {} for {}",
                        notional, pair.min_notional, pair.symbol
                    ),
                ));
            }
        }

        let client_order_id =
            client_order_id.unwrap_or_else(|| Self::generate_client_order_id(side, pair));

        Ok(Order::new(
            pair.symbol.clone(),
            side,
            kind,
            adjusted_price,
            adjusted_amount,
            deal_id,
            Some(client_order_id),
        ))
    }

    pub fn create_buy(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        price: crate::money::Money,
        deal_id: DealId,
        kind: OrderKind,
        client_order_id: Option<String>,
    ) -> Result<Order, EngineError> {
        Self::create(pair, Side::Buy, kind, amount, price, Some(deal_id), client_order_id)
    }

    pub fn create_sell(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        price: crate::money::Money,
        deal_id: DealId,
        kind: OrderKind,
        client_order_id: Option<String>,
    ) -> Result<Order, EngineError> {
        Self::create(pair, Side::Sell, kind, amount, price, Some(deal_id), client_order_id)
    }

    pub fn market_buy(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        deal_id: DealId,
    ) -> Result<Order, EngineError> {
        Self::create(
            pair,
            Side::Buy,
            OrderKind::Market,
            amount,
            crate::money::Money::ZERO,
            Some(deal_id),
            None,
        )
    }

    pub fn market_sell(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        deal_id: DealId,
    ) -> Result<Order, EngineError> {
        Self::create(
            pair,
            Side::Sell,
            OrderKind::Market,
            amount,
            crate::money::Money::ZERO,
            Some(deal_id),
            None,
        )
    }

    pub fn stop_loss(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        stop_price: crate::money::Money,
        deal_id: DealId,
    ) -> Result<Order, EngineError> {
        Self::create(
            pair,
            Side::Sell,
            OrderKind::StopLoss,
            amount,
            stop_price,
            Some(deal_id),
            None,
        )
    }

    pub fn take_profit(
        pair: &CurrencyPair,
        amount: crate::money::Money,
        target_price: crate::money::Money,
        deal_id: DealId,
    ) -> Result<Order, EngineError> {
        Self::create(
            pair,
            Side::Sell,
            OrderKind::TakeProfit,
            amount,
            target_price,
            Some(deal_id),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::Symbol;

    fn sample_pair() -> CurrencyPair {
        CurrencyPair {
            symbol: Symbol::new("ETH/USDT"),
            base: "ETH".into(),
            quote: "USDT".into(),
            price_tick: Money::from_f64(0.01),
            amount_step: Money::from_f64(0.0001),
            min_amount: Money::from_f64(0.0001),
            max_amount: Money::from_f64(1000.0),
            min_notional: Money::from_f64(10.0),
            maker_fee: Money::from_f64(0.001),
            taker_fee: Money::from_f64(0.001),
            deal_quota: Money::from_f64(100.0),
            deal_count: 5,
            profit_markup: Money::from_f64(0.005),
            order_life_time_minutes: 15,
        }
    }

    #[test]
    fn test_buy_amount_ceiled_price_floored() {
        let pair = sample_pair();
        let order = OrderFactory::create_buy(
            &pair,
            Money::from_f64(0.03991),
            Money::from_f64(2500.567),
            1,
            OrderKind::Limit,
            None,
        )
        .unwrap();
        assert_eq!(order.amount.to_f64(), 0.04);
        assert_eq!(order.price.to_f64(), 2500.56);
    }

    #[test]
    fn test_sell_amount_floored_price_ceiled() {
        let pair = sample_pair();
        let order = OrderFactory::create_sell(
            &pair,
            Money::from_f64(0.03991),
            Money::from_f64(2500.561),
            1,
            OrderKind::Limit,
            None,
        )
        .unwrap();
        assert_eq!(order.amount.to_f64(), 0.0399);
        assert_eq!(order.price.to_f64(), 2500.57);
    }

    #[test]
    fn test_rejects_below_min_notional() {
        let pair = sample_pair();
        let result = OrderFactory::create_buy(
            &pair,
            Money::from_f64(0.001),
            Money::from_f64(100.0),
            1,
            OrderKind::Limit,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_client_order_id_generated_when_absent() {
        let pair = sample_pair();
        let order = OrderFactory::create_buy(
            &pair,
            Money::from_f64(0.04),
            Money::from_f64(2500.0),
            1,
            OrderKind::Limit,
            None,
        )
        .unwrap();
        assert!(order.client_order_id.unwrap().starts_with("buy_ETHUSDT_"));
    }

    #[test]
    fn test_market_order_price_is_zero() {
        let pair = sample_pair();
        let order = OrderFactory::market_buy(&pair, Money::from_f64(0.04), 1).unwrap();
        assert_eq!(order.price, Money::ZERO);
    }
}
