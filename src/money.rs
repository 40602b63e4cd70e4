//! Exact-decimal monetary arithmetic and exchange-precision quantization (C1).
//!
//! Wraps `rust_decimal::Decimal` to prevent floating-point drift in PnL tracking.
//! Use this type for every monetary value: prices, amounts, fees, budgets.
//!
//! # Why Money instead of f64?
//! `0.1 + 0.2 != 0.3` in f64. Over thousands of orders, balance reconciliation
//! against the exchange would drift and eventually produce spurious invariant
//! breaches (§8, I2).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const ONE: Money = Money(Decimal::ONE);

    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::try_from(value).unwrap_or_else(|_| {
            if value.is_nan() || value.is_infinite() {
                Decimal::ZERO
            } else {
                Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
            }
        }))
    }

    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn from_i64(value: i64) -> Self {
        Money(Decimal::from(value))
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative()
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Money {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul for Money {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Money(self.0 * rhs.0)
    }
}

impl Div for Money {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        if rhs.0.is_zero() {
            Money::ZERO
        } else {
            Money(self.0 / rhs.0)
        }
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl From<f64> for Money {
    fn from(value: f64) -> Self {
        Money::from_f64(value)
    }
}

impl From<Money> for f64 {
    fn from(value: Money) -> Self {
        value.to_f64()
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Money::from_i64(value)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> std::iter::Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

/// Rounding mode for `quantize` (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeMode {
    Floor,
    Ceil,
    HalfUp,
}

/// Align `value` to an integer multiple of `step`, in the given mode.
///
/// Guarantees: the result never exceeds `value` by more than one `step` (floor)
/// nor falls short by more than one `step` (ceil). Fails if `step <= 0`.
pub fn quantize(value: Money, step: Money, mode: QuantizeMode) -> Result<Money, EngineError> {
    if !step.is_positive() {
        return Err(EngineError::precision(format!(
            "quantize step must be positive, got {step}"
        )));
    }
    let units = value.0 / step.0;
    let rounded_units = match mode {
        QuantizeMode::Floor => units.floor(),
        QuantizeMode::Ceil => units.ceil(),
        QuantizeMode::HalfUp => units.round_dp_with_strategy(
            0,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        ),
    };
    Ok(Money(rounded_units * step.0))
}

/// `quantize` with `step = 10^-decimals`, rounded down.
pub fn floor_to_precision(value: Money, decimals: u32) -> Result<Money, EngineError> {
    let step = Money(Decimal::new(1, decimals));
    quantize(value, step, QuantizeMode::Floor)
}

/// `quantize` with `step = 10^-decimals`, rounded up.
pub fn ceil_to_precision(value: Money, decimals: u32) -> Result<Money, EngineError> {
    let step = Money(Decimal::new(1, decimals));
    quantize(value, step, QuantizeMode::Ceil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_precision() {
        let a = Money::from_f64(0.1);
        let b = Money::from_f64(0.2);
        let c = Money::from_f64(0.3);
        assert_eq!(a + b, c, "Money should handle 0.1 + 0.2 = 0.3 correctly");
    }

    #[test]
    fn test_money_arithmetic() {
        let price = Money::from_f64(100.0);
        let qty = Money::from_f64(2.5);
        let total = price * qty;
        assert_eq!(total.to_f64(), 250.0);
    }

    #[test]
    fn test_money_comparison() {
        let a = Money::from_f64(100.0);
        let b = Money::from_f64(200.0);
        assert!(a < b);
        assert!(b > a);
        assert_eq!(a.max(b), b);
        assert_eq!(a.min(b), a);
    }

    #[test]
    fn test_money_div_by_zero() {
        let a = Money::from_f64(100.0);
        assert_eq!(a / Money::ZERO, Money::ZERO);
    }

    #[test]
    fn test_money_serde() {
        let money = Money::from_f64(123.456);
        let json = serde_json::to_string(&money).unwrap();
        let parsed: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(money, parsed);
    }

    #[test]
    fn test_quantize_floor_and_ceil() {
        let value = Money::from_f64(2500.567);
        let step = Money::from_f64(0.01);
        assert_eq!(
            quantize(value, step, QuantizeMode::Floor).unwrap().to_f64(),
            2500.56
        );
        assert_eq!(
            quantize(value, step, QuantizeMode::Ceil).unwrap().to_f64(),
            2500.57
        );
    }

    #[test]
    fn test_quantize_half_up() {
        let value = Money::from_f64(2500.565);
        let step = Money::from_f64(0.01);
        assert_eq!(
            quantize(value, step, QuantizeMode::HalfUp)
                .unwrap()
                .to_f64(),
            2500.57
        );
    }

    #[test]
    fn test_quantize_rejects_nonpositive_step() {
        let value = Money::from_f64(1.0);
        assert!(quantize(value, Money::ZERO, QuantizeMode::Floor).is_err());
        assert!(quantize(value, Money::from_f64(-1.0), QuantizeMode::Floor).is_err());
    }

    #[test]
    fn test_never_overshoots_by_more_than_one_step() {
        let value = Money::from_f64(100.0037);
        let step = Money::from_f64(0.001);
        let floored = quantize(value, step, QuantizeMode::Floor).unwrap();
        let ceiled = quantize(value, step, QuantizeMode::Ceil).unwrap();
        assert!(value - floored < step);
        assert!(ceiled - value < step);
    }

    #[test]
    fn test_ceil_floor_to_precision() {
        let value = Money::from_f64(0.03995);
        assert_eq!(floor_to_precision(value, 4).unwrap().to_f64(), 0.0399);
        assert_eq!(ceil_to_precision(value, 4).unwrap().to_f64(), 0.04);
    }
}
