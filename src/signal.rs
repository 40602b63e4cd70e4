//! Signal Generator (C8, §4.8): tiered indicator computation over a rolling
//! price window, wrapping the `ta` crate the way the rest of the indicator
//! stack does.

use std::collections::VecDeque;

use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

use crate::types::PriceWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Hold,
}

const MIN_OBSERVATIONS: usize = 50;
const MEDIUM_TIER_PERIOD: usize = 10;
const HEAVY_TIER_PERIOD: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
struct FastTier {
    sma7: f64,
    sma25: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct MediumTier {
    rsi5: f64,
    rsi15: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct HeavyTier {
    macd: f64,
    macd_signal: f64,
    macd_histogram: f64,
    sma75: f64,
    bollinger_upper: f64,
    bollinger_lower: f64,
}

/// Maintains the rolling window and indicator state for one symbol (§4.8).
pub struct SignalGenerator {
    window: PriceWindow,
    closes: VecDeque<f64>,
    tick_count: u64,

    sma7: SimpleMovingAverage,
    sma25: SimpleMovingAverage,
    rsi5: RelativeStrengthIndex,
    rsi15: RelativeStrengthIndex,
    macd: MovingAverageConvergenceDivergence,
    sma75: SimpleMovingAverage,
    bollinger: BollingerBands,

    fast: FastTier,
    medium: MediumTier,
    heavy: HeavyTier,
}

impl SignalGenerator {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            window: PriceWindow::new(window_capacity),
            closes: VecDeque::with_capacity(window_capacity.min(4096)),
            tick_count: 0,
            sma7: SimpleMovingAverage::new(7).expect("valid period"),
            sma25: SimpleMovingAverage::new(25).expect("valid period"),
            rsi5: RelativeStrengthIndex::new(5).expect("valid period"),
            rsi15: RelativeStrengthIndex::new(15).expect("valid period"),
            macd: MovingAverageConvergenceDivergence::new(12, 26, 9).expect("valid periods"),
            sma75: SimpleMovingAverage::new(75).expect("valid period"),
            bollinger: BollingerBands::new(20, 2.0).expect("valid period"),
            fast: FastTier::default(),
            medium: MediumTier::default(),
            heavy: HeavyTier::default(),
        }
    }

    pub fn on_tick(&mut self, tick: crate::types::Tick) -> Signal {
        self.window.push(tick);
        let close = tick.last.to_f64();
        self.closes.push_back(close);
        if self.closes.len() > 100 {
            self.closes.pop_front();
        }
        self.tick_count += 1;

        self.fast.sma7 = self.sma7.next(close);
        self.fast.sma25 = self.sma25.next(close);

        if self.tick_count % MEDIUM_TIER_PERIOD as u64 == 0 {
            self.medium.rsi5 = self.rsi5.next(close);
            self.medium.rsi15 = self.rsi15.next(close);
        }

        if self.tick_count % HEAVY_TIER_PERIOD as u64 == 0 {
            let macd_output = self.macd.next(close);
            self.heavy.macd = macd_output.macd;
            self.heavy.macd_signal = macd_output.signal;
            self.heavy.macd_histogram = macd_output.histogram;
            self.heavy.sma75 = self.sma75.next(close);
            let bb = self.bollinger.next(close);
            self.heavy.bollinger_upper = bb.upper;
            self.heavy.bollinger_lower = bb.lower;
        }

        if self.tick_count < MIN_OBSERVATIONS as u64 {
            return Signal::Hold;
        }

        if self.heavy.macd > self.heavy.macd_signal
            && self.heavy.macd_histogram > 0.0
            && self.fast.sma7 > self.fast.sma25
        {
            Signal::Buy
        } else {
            Signal::Hold
        }
    }

    pub fn observations(&self) -> u64 {
        self.tick_count
    }

    pub fn price_window(&self) -> &PriceWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::Utc;

    fn tick(price: f64) -> crate::types::Tick {
        crate::types::Tick {
            timestamp: Utc::now(),
            last: Money::from_f64(price),
            bid: Money::from_f64(price - 0.1),
            ask: Money::from_f64(price + 0.1),
            volume: Money::ZERO,
        }
    }

    #[test]
    fn test_hold_before_minimum_observations() {
        let mut gen = SignalGenerator::new(200);
        for i in 0..30 {
            let signal = gen.on_tick(tick(100.0 + i as f64));
            assert_eq!(signal, Signal::Hold);
        }
    }

    #[test]
    fn test_uptrend_eventually_allows_buy_or_hold() {
        let mut gen = SignalGenerator::new(200);
        let mut last = Signal::Hold;
        for i in 0..120 {
            last = gen.on_tick(tick(100.0 + i as f64 * 0.5));
        }
        assert!(matches!(last, Signal::Buy | Signal::Hold));
        assert_eq!(gen.observations(), 120);
    }
}
