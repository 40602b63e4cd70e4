//! Order-Book Analyzer (C7, §4.7): turns a raw snapshot into derived
//! liquidity metrics and a categorical buy/sell signal.

use ordered_float::OrderedFloat;

use crate::money::Money;
use crate::types::{Level, OrderBookSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub min_liquidity_depth: usize,
    pub max_spread_percent: f64,
    pub typical_order_size: Money,
    pub big_wall_threshold: Money,
    pub support_resistance_max_pct: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_liquidity_depth: 5,
            max_spread_percent: 1.0,
            typical_order_size: Money::from_f64(1000.0),
            big_wall_threshold: Money::from_f64(5.0),
            support_resistance_max_pct: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSignal {
    Reject,
    StrongSell,
    WeakSell,
    Neutral,
    WeakBuy,
    StrongBuy,
}

#[derive(Debug, Clone)]
pub struct BookAnalysis {
    pub best_bid: Money,
    pub best_ask: Money,
    pub spread_percent: f64,
    pub bid_volume: Money,
    pub ask_volume: Money,
    pub volume_imbalance: f64,
    pub liquidity_depth: f64,
    pub support_level: Option<Money>,
    pub resistance_level: Option<Money>,
    pub buy_slippage_percent: f64,
    pub sell_slippage_percent: f64,
    pub big_walls: Vec<Level>,
    pub signal: BookSignal,
    pub confidence: f64,
}

const SLIPPAGE_SENTINEL: f64 = 999.0;

pub struct OrderBookAnalyzer {
    config: AnalyzerConfig,
}

impl OrderBookAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, snapshot: &OrderBookSnapshot) -> BookAnalysis {
        let cfg = &self.config;

        if snapshot.bids.len() < cfg.min_liquidity_depth || snapshot.asks.len() < cfg.min_liquidity_depth {
            return BookAnalysis {
                best_bid: Money::ZERO,
                best_ask: Money::ZERO,
                spread_percent: 0.0,
                bid_volume: Money::ZERO,
                ask_volume: Money::ZERO,
                volume_imbalance: 0.0,
                liquidity_depth: 0.0,
                support_level: None,
                resistance_level: None,
                buy_slippage_percent: SLIPPAGE_SENTINEL,
                sell_slippage_percent: SLIPPAGE_SENTINEL,
                big_walls: vec![],
                signal: BookSignal::Reject,
                confidence: 0.5,
            };
        }

        let best_bid = snapshot.bids[0].price;
        let best_ask = snapshot.asks[0].price;
        let mid = (best_bid + best_ask) / Money::from_f64(2.0);
        let spread_percent = ((best_ask - best_bid) / best_bid * Money::from_f64(100.0)).to_f64();

        let bid_volume = snapshot.bids[..cfg.min_liquidity_depth]
            .iter()
            .fold(Money::ZERO, |acc, l| acc + l.size);
        let ask_volume = snapshot.asks[..cfg.min_liquidity_depth]
            .iter()
            .fold(Money::ZERO, |acc, l| acc + l.size);
        let total_volume = bid_volume + ask_volume;
        let volume_imbalance = if total_volume.is_zero() {
            0.0
        } else {
            ((bid_volume - ask_volume) / total_volume * Money::from_f64(100.0)).to_f64()
        };

        let liquidity_depth = Self::liquidity_depth(snapshot, mid);

        let support_level = Self::dominant_level(&snapshot.bids[..snapshot.bids.len().min(20)], mid.to_f64(), cfg.support_resistance_max_pct, true);
        let resistance_level = Self::dominant_level(&snapshot.asks[..snapshot.asks.len().min(20)], mid.to_f64(), cfg.support_resistance_max_pct, false);

        let buy_slippage_percent = Self::slippage(&snapshot.asks, best_ask, cfg.typical_order_size);
        let sell_slippage_percent = Self::slippage(&snapshot.bids, best_bid, cfg.typical_order_size);

        let big_walls: Vec<Level> = snapshot
            .bids
            .iter()
            .chain(snapshot.asks.iter())
            .filter(|l| l.size > cfg.big_wall_threshold)
            .copied()
            .collect();

        if spread_percent > cfg.max_spread_percent
            || buy_slippage_percent > 2.0
            || sell_slippage_percent > 2.0
            || liquidity_depth < cfg.min_liquidity_depth as f64
        {
            return BookAnalysis {
                best_bid,
                best_ask,
                spread_percent,
                bid_volume,
                ask_volume,
                volume_imbalance,
                liquidity_depth,
                support_level,
                resistance_level,
                buy_slippage_percent,
                sell_slippage_percent,
                big_walls,
                signal: BookSignal::Reject,
                confidence: 0.5,
            };
        }

        let mut score = 0i32;
        let mut confidence = 0.5f64;

        if volume_imbalance > 20.0 {
            score += 2;
            confidence += 0.1;
        } else if volume_imbalance > 10.0 {
            score += 1;
            confidence += 0.05;
        } else if volume_imbalance < -20.0 {
            score -= 2;
            confidence += 0.1;
        } else if volume_imbalance < -10.0 {
            score -= 1;
            confidence += 0.05;
        }

        if support_level.is_some() && resistance_level.is_none() {
            score += 1;
            confidence += 0.05;
        } else if resistance_level.is_some() && support_level.is_none() {
            score -= 1;
            confidence += 0.05;
        }

        if liquidity_depth > cfg.min_liquidity_depth as f64 * 2.0 {
            score += 1;
            confidence += 0.05;
        }

        if buy_slippage_percent < 0.1 && sell_slippage_percent < 0.1 {
            score += 1;
            confidence += 0.05;
        }

        let signal = match score {
            s if s >= 3 => BookSignal::StrongBuy,
            s if s >= 1 => BookSignal::WeakBuy,
            s if s <= -3 => BookSignal::StrongSell,
            s if s <= -1 => BookSignal::WeakSell,
            _ => BookSignal::Neutral,
        };

        BookAnalysis {
            best_bid,
            best_ask,
            spread_percent,
            bid_volume,
            ask_volume,
            volume_imbalance,
            liquidity_depth,
            support_level,
            resistance_level,
            buy_slippage_percent,
            sell_slippage_percent,
            big_walls,
            signal,
            confidence: confidence.clamp(0.5, 0.95),
        }
    }

    fn liquidity_depth(snapshot: &OrderBookSnapshot, mid: Money) -> f64 {
        let band = mid.to_f64() * 0.05;
        let lo = mid.to_f64() - band;
        let hi = mid.to_f64() + band;

        let mut total = 0.0f64;
        let mut max_distance = f64::EPSILON;

        for level in snapshot.bids.iter().chain(snapshot.asks.iter()) {
            let price = level.price.to_f64();
            if price >= lo && price <= hi {
                total += level.size.to_f64();
                let distance = (price - mid.to_f64()).abs();
                if distance > max_distance {
                    max_distance = distance;
                }
            }
        }

        if max_distance <= f64::EPSILON {
            total
        } else {
            total / max_distance
        }
    }

    fn dominant_level(levels: &[Level], mid: f64, max_pct: f64, is_bid_side: bool) -> Option<Money> {
        let largest = levels.iter().max_by_key(|l| OrderedFloat(l.size.to_f64()))?;
        let distance_pct = (largest.price.to_f64() - mid).abs() / mid * 100.0;
        if distance_pct > max_pct {
            return None;
        }
        let _ = is_bid_side;
        Some(largest.price)
    }

    fn slippage(levels: &[Level], best: Money, typical_order_size: Money) -> f64 {
        let mut remaining = typical_order_size;
        let mut notional = Money::ZERO;
        let mut filled_qty = Money::ZERO;

        for level in levels {
            if remaining.is_zero() || !remaining.is_positive() {
                break;
            }
            let level_notional_capacity = level.price * level.size;
            let take = if level_notional_capacity <= remaining {
                level.size
            } else {
                remaining / level.price
            };
            notional += take * level.price;
            filled_qty += take;
            remaining -= take * level.price;
        }

        if filled_qty.is_zero() || remaining.is_positive() {
            return SLIPPAGE_SENTINEL;
        }

        let avg = notional / filled_qty;
        ((avg - best).abs() / best * Money::from_f64(100.0)).to_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn level(price: f64, size: f64) -> Level {
        Level {
            price: Money::from_f64(price),
            size: Money::from_f64(size),
        }
    }

    fn deep_snapshot() -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: crate::types::Symbol::new("ETH/USDT"),
            timestamp: chrono::Utc::now(),
            bids: vec![
                level(2499.0, 10.0),
                level(2498.0, 8.0),
                level(2497.0, 6.0),
                level(2496.0, 5.0),
                level(2495.0, 5.0),
            ],
            asks: vec![
                level(2500.0, 4.0),
                level(2501.0, 4.0),
                level(2502.0, 4.0),
                level(2503.0, 4.0),
                level(2504.0, 4.0),
            ],
        }
    }

    #[test]
    fn test_rejects_thin_book() {
        let analyzer = OrderBookAnalyzer::new(AnalyzerConfig::default());
        let snapshot = OrderBookSnapshot {
            symbol: crate::types::Symbol::new("ETH/USDT"),
            timestamp: chrono::Utc::now(),
            bids: vec![level(2499.0, 1.0)],
            asks: vec![level(2500.0, 1.0)],
        };
        let analysis = analyzer.analyze(&snapshot);
        assert_eq!(analysis.signal, BookSignal::Reject);
    }

    #[test]
    fn test_bid_heavy_book_skews_buy() {
        let analyzer = OrderBookAnalyzer::new(AnalyzerConfig::default());
        let analysis = analyzer.analyze(&deep_snapshot());
        assert!(analysis.volume_imbalance > 0.0);
        assert_ne!(analysis.signal, BookSignal::Reject);
    }

    #[test]
    fn test_spread_percent_computation() {
        let analyzer = OrderBookAnalyzer::new(AnalyzerConfig::default());
        let analysis = analyzer.analyze(&deep_snapshot());
        assert_relative_eq!(analysis.spread_percent, (2500.0 - 2499.0) / 2499.0 * 100.0, epsilon = 1e-6);
    }
}
