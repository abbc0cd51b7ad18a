use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::errors::{LedgerError, Result};

/// decimal places of the single ledger currency
pub const MINOR_UNIT_SCALE: u32 = 2;

const MINOR_PER_MAJOR: i64 = 100;

/// Money held as signed integer minor units (paisa, cents).
///
/// All ledger arithmetic happens on the integer; `Decimal` only appears when
/// converting form input at the boundary and when rendering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const ONE: Money = Money(MINOR_PER_MAJOR);

    /// create from minor units
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// create from whole currency units
    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_PER_MAJOR)
    }

    /// convert a decimal amount, rounding half away from zero to the minor unit
    pub fn from_decimal(d: Decimal) -> Result<Self> {
        let scaled = d
            .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero)
            * Decimal::from(MINOR_PER_MAJOR);

        scaled
            .to_i64()
            .map(Money)
            .ok_or_else(|| LedgerError::InvalidAmount {
                input: d.to_string(),
            })
    }

    /// parse a decimal string such as "2500.50"
    pub fn from_str_exact(s: &str) -> Result<Self> {
        let d = Decimal::from_str(s.trim()).map_err(|_| LedgerError::InvalidAmount {
            input: s.to_string(),
        })?;
        Self::from_decimal(d)
    }

    /// convert a floating-point value coming from an external form
    pub fn from_form_value(value: f64) -> Result<Self> {
        let d = Decimal::try_from(value).map_err(|_| LedgerError::InvalidAmount {
            input: value.to_string(),
        })?;
        Self::from_decimal(d)
    }

    /// minor units
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// decimal view for display and export
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(self.0, MINOR_UNIT_SCALE)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// floor at zero
    pub fn clamp_non_negative(self) -> Self {
        self.max(Money::ZERO)
    }

    /// addition that reports overflow instead of wrapping
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| LedgerError::InvalidAmount {
                input: format!("{} + {} overflows", self, other),
            })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| LedgerError::InvalidAmount {
                input: format!("{} - {} overflows", self, other),
            })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Money::from_str_exact(s)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = LedgerError;

    fn try_from(d: Decimal) -> Result<Self> {
        Money::from_decimal(d)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_major_minor_conversion() {
        assert_eq!(Money::from_major(5_000).minor(), 500_000);
        assert_eq!(Money::from_minor(1_050).to_string(), "10.50");
        assert_eq!(Money::from_major(-3).to_string(), "-3.00");
    }

    #[test]
    fn test_decimal_boundary_rounding() {
        assert_eq!(Money::from_decimal(dec!(10.005)).unwrap(), Money::from_minor(1_001));
        assert_eq!(Money::from_decimal(dec!(-10.005)).unwrap(), Money::from_minor(-1_001));
        assert_eq!(Money::from_decimal(dec!(2999.994)).unwrap(), Money::from_minor(299_999));
    }

    #[test]
    fn test_form_values_never_accumulate_float_error() {
        // 0.1 + 0.2 in floating point is 0.30000000000000004
        let a = Money::from_form_value(0.1).unwrap();
        let b = Money::from_form_value(0.2).unwrap();
        assert_eq!(a + b, Money::from_minor(30));
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!("2500.50".parse::<Money>().unwrap(), Money::from_minor(250_050));
        assert_eq!(Money::from_str_exact(" 7 ").unwrap(), Money::from_major(7));
        assert!(matches!(
            Money::from_str_exact("abc"),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_sum_and_clamp() {
        let items = [
            Money::from_major(5_000),
            Money::from_major(2_000),
            Money::from_major(-500),
        ];
        let total: Money = items.iter().sum();
        assert_eq!(total, Money::from_major(6_500));
        assert_eq!(
            (Money::from_major(4_000) - Money::from_major(10_000)).clamp_non_negative(),
            Money::ZERO
        );
    }

    #[test]
    fn test_checked_arithmetic() {
        let fee = Money::from_major(4_000);
        assert_eq!(fee.checked_add(Money::ONE).unwrap(), Money::from_major(4_001));
        assert_eq!(fee.checked_sub(Money::ONE).unwrap(), Money::from_major(3_999));
        assert!(matches!(
            fee.checked_add(Money::from_minor(i64::MAX)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            Money::from_minor(-5).checked_sub(Money::from_minor(i64::MAX)),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}
