//! Fixed-point asset amounts.
//!
//! Amounts are stored as signed 64-bit integers scaled by 10^8, so one
//! whole unit is `100_000_000` raw units. Arithmetic is integer-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Raw units per whole unit.
pub const FIXED8_DECIMALS: i64 = 100_000_000;

/// A fixed-point amount with eight decimal places.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fixed8(i64);

impl Fixed8 {
    pub const ZERO: Self = Self(0);
    pub const SATOSHI: Self = Self(1);
    pub const MAX: Self = Self(i64::MAX);

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Whole units, saturating on overflow.
    pub fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(FIXED8_DECIMALS))
    }

    pub fn raw(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Whether the amount can be expressed with `precision` decimals.
    pub fn fits_precision(&self, precision: u8) -> bool {
        let precision = precision.min(8) as u32;
        self.0 % 10i64.pow(8 - precision) == 0
    }
}

impl Add for Fixed8 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed8 {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed8 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Fixed8 {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fixed8 {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / FIXED8_DECIMALS as u64;
        let frac = abs % FIXED8_DECIMALS as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let digits = format!("{frac:08}");
            write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_scale_by_ten_to_the_eight() {
        assert_eq!(Fixed8::from_units(3).raw(), 300_000_000);
    }

    #[test]
    fn display_trims_fraction() {
        assert_eq!(Fixed8::from_raw(150_000_000).to_string(), "1.5");
        assert_eq!(Fixed8::from_units(-2).to_string(), "-2");
        assert_eq!(Fixed8::SATOSHI.to_string(), "0.00000001");
    }

    #[test]
    fn precision_check() {
        assert!(Fixed8::from_units(5).fits_precision(0));
        assert!(!Fixed8::from_raw(150_000_000).fits_precision(0));
        assert!(Fixed8::from_raw(150_000_000).fits_precision(1));
    }

    #[test]
    fn sum_of_amounts() {
        let total: Fixed8 = [1, 2, 3].into_iter().map(Fixed8::from_units).sum();
        assert_eq!(total, Fixed8::from_units(6));
    }
}
