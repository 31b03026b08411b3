//! # Money Module
//!
//! Integer reward units: [`Money`] for spend and cashback (cents) and
//! [`Points`] for loyalty points (whole points).
//!
//! ## Why Integer Units?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  REPROCESSING MUST REPRODUCE THE SAME NUMBERS                           │
//! │                                                                         │
//! │  A reward computed today and replayed in six months has to agree to    │
//! │  the last unit. Floats drift; integers do not.                         │
//! │                                                                         │
//! │  spend (cents, i64) × rate (exact decimal) → round half-up → i64       │
//! │                                                                         │
//! │  Rounding happens exactly once, at the smallest tracked unit:          │
//! │    cashback → 1 cent                                                   │
//! │    points   → 1 point                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use perk_core::money::{Money, Points};
//! use perk_core::types::Rate;
//!
//! let spend = Money::from_cents(12_345); // $123.45
//! let rate: Rate = "0.04".parse().unwrap();
//!
//! // $123.45 × 4% = $4.938 → $4.94
//! assert_eq!(spend.apply_rate(rate).cents(), 494);
//!
//! // $123.45 × 3 points per dollar = 370.35 → 370 points
//! let three_x: Rate = "3".parse().unwrap();
//! assert_eq!(Points::earned(spend, three_x).value(), 370);
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::types::Rate;

/// Rounds a decimal half-up (away from zero at the midpoint) to a whole unit.
///
/// Values beyond the i64 range saturate; validated spend and rate limits keep
/// real inputs far below that.
fn round_half_up(value: Decimal) -> i64 {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Used for transaction spend and for granted cashback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the value in major units as an exact decimal (1099 → 10.99).
    pub fn major_units(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Applies a decimal rate and rounds half-up to whole cents.
    ///
    /// ## Example
    /// ```rust
    /// use perk_core::money::Money;
    /// use perk_core::types::Rate;
    ///
    /// // $0.50 × 1% = 0.5 cents → rounds up to 1 cent
    /// let rate: Rate = "0.01".parse().unwrap();
    /// assert_eq!(Money::from_cents(50).apply_rate(rate).cents(), 1);
    /// ```
    pub fn apply_rate(&self, rate: Rate) -> Money {
        Money(round_half_up(Decimal::from(self.0) * rate.value()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

// =============================================================================
// Points Type
// =============================================================================

/// A quantity of loyalty points (whole points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Points(i64);

impl Points {
    /// Creates a points value.
    #[inline]
    pub const fn new(value: i64) -> Self {
        Points(value)
    }

    /// Returns the raw number of points.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Zero points.
    #[inline]
    pub const fn zero() -> Self {
        Points(0)
    }

    /// Points earned on a spend at `rate` points per major currency unit,
    /// rounded half-up to whole points.
    ///
    /// ## Example
    /// ```rust
    /// use perk_core::money::{Money, Points};
    /// use perk_core::types::Rate;
    ///
    /// // $250.00 at 2x = 500 points
    /// let rate: Rate = "2".parse().unwrap();
    /// assert_eq!(Points::earned(Money::from_cents(25_000), rate).value(), 500);
    /// ```
    pub fn earned(spend: Money, rate: Rate) -> Points {
        Points(round_half_up(spend.major_units() * rate.value()))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pts", self.0)
    }
}

impl Default for Points {
    fn default() -> Self {
        Points::zero()
    }
}

impl Add for Points {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Points(self.0 + other.0)
    }
}

impl Sub for Points {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Points(self.0 - other.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(s: &str) -> Rate {
        s.parse().unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(500)), "$5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Points::new(120)), "120 pts");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);
        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((Points::new(7) + Points::new(3)).value(), 10);
    }

    #[test]
    fn test_apply_rate_rounds_half_up() {
        // 250 × 0.01 = 2.5 → 3 (half-up, not half-even)
        assert_eq!(Money::from_cents(250).apply_rate(rate("0.01")).cents(), 3);
        // 249 × 0.01 = 2.49 → 2
        assert_eq!(Money::from_cents(249).apply_rate(rate("0.01")).cents(), 2);
        // 350 × 0.01 = 3.5 → 4 (half-even would give 4 too, 2.5 is the telling case)
        assert_eq!(Money::from_cents(350).apply_rate(rate("0.01")).cents(), 4);
    }

    #[test]
    fn test_points_earned() {
        // $10.50 at 1x = 10.5 → 11
        assert_eq!(Points::earned(Money::from_cents(1050), rate("1")).value(), 11);
        // $10.49 at 1x = 10.49 → 10
        assert_eq!(Points::earned(Money::from_cents(1049), rate("1")).value(), 10);
        // $0.00 earns nothing
        assert_eq!(Points::earned(Money::zero(), rate("5")).value(), 0);
    }

    #[test]
    fn test_major_units_is_exact() {
        assert_eq!(Money::from_cents(1099).major_units().to_string(), "10.99");
    }
}
