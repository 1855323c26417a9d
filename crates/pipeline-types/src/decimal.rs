//! Fixed-scale decimal arithmetic for USD-denominated ledger values.
//!
//! Mirrors the `formatDecimal(precision=8)` pattern called out as load-bearing
//! in the design notes: every USD amount is a scaled `i128` (1 unit = 1e-8
//! USD) so that additions and subtractions never drift the way binary floats
//! would.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;

pub const USD_SCALE: u32 = 8;
const USD_SCALE_FACTOR: i128 = 100_000_000;

#[derive(Debug, Snafu)]
pub enum DecimalError {
    #[snafu(display("invalid decimal literal: {}", input))]
    Parse { input: String },
    #[snafu(display("decimal arithmetic overflowed"))]
    Overflow,
    #[snafu(display("decimal arithmetic underflowed below zero"))]
    Underflow,
}

/// A non-negative USD amount scaled by 1e8.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct UsdAmount(i128);

impl UsdAmount {
    pub const ZERO: UsdAmount = UsdAmount(0);

    pub fn from_scaled(raw: i128) -> Self {
        UsdAmount(raw)
    }

    pub fn raw(&self) -> i128 {
        self.0
    }

    pub fn checked_add(&self, other: UsdAmount) -> Result<UsdAmount, DecimalError> {
        self.0
            .checked_add(other.0)
            .map(UsdAmount)
            .ok_or(DecimalError::Overflow)
    }

    pub fn checked_sub(&self, other: UsdAmount) -> Result<UsdAmount, DecimalError> {
        let result = self.0.checked_sub(other.0).ok_or(DecimalError::Overflow)?;
        if result < 0 {
            Err(DecimalError::Underflow)
        } else {
            Ok(UsdAmount(result))
        }
    }

    /// Saturating subtraction, floored at zero. Used by REPAY, where the
    /// spec requires capping at the outstanding borrow total rather than
    /// erroring.
    pub fn saturating_sub(&self, other: UsdAmount) -> UsdAmount {
        UsdAmount((self.0 - other.0).max(0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn min(self, other: UsdAmount) -> UsdAmount {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Converts a micro-USD value (1 unit = 1e-6 USD), the scale
    /// `LendingPool::utilization` reports on-chain figures in, to the
    /// ledger's 1e-8 scale.
    pub fn from_micro_usd(raw: u64) -> UsdAmount {
        UsdAmount(raw as i128 * 100)
    }

    /// Applies an LTV-style whole-percent ratio (e.g. `75` for 75%).
    pub fn mul_percent(&self, percent: u32) -> UsdAmount {
        UsdAmount(self.0 * percent as i128 / 100)
    }
}

impl fmt::Debug for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UsdAmount({})", self)
    }
}

impl fmt::Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < 0;
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / USD_SCALE_FACTOR as u128;
        let frac = magnitude % USD_SCALE_FACTOR as u128;
        if negative {
            write!(f, "-")?;
        }
        write!(f, "{}.{:08}", whole, frac)
    }
}

impl FromStr for UsdAmount {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = s.splitn(2, '.');
        let whole_part = parts.next().unwrap_or("0");
        let frac_part = parts.next().unwrap_or("0");
        if whole_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalError::Parse { input: s.into() });
        }
        let whole: i128 = whole_part
            .parse()
            .map_err(|_| DecimalError::Parse { input: s.into() })?;
        if frac_part.len() > USD_SCALE as usize {
            return Err(DecimalError::Parse { input: s.into() });
        }
        let mut frac_digits = frac_part.to_string();
        while frac_digits.len() < USD_SCALE as usize {
            frac_digits.push('0');
        }
        let frac: i128 = frac_digits
            .parse()
            .map_err(|_| DecimalError::Parse { input: s.into() })?;
        let magnitude = whole * USD_SCALE_FACTOR + frac;
        Ok(UsdAmount(if negative { -magnitude } else { magnitude }))
    }
}

impl Serialize for UsdAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UsdAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UsdAmount::from_str(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let amount = UsdAmount::from_str("1234.5").unwrap();
        assert_eq!(amount.to_string(), "1234.50000000");
        assert_eq!(UsdAmount::from_str(&amount.to_string()).unwrap(), amount);
    }

    #[test]
    fn checked_sub_rejects_negative_results() {
        let small = UsdAmount::from_str("1.0").unwrap();
        let big = UsdAmount::from_str("2.0").unwrap();
        assert!(small.checked_sub(big).is_err());
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let small = UsdAmount::from_str("1.0").unwrap();
        let big = UsdAmount::from_str("2.0").unwrap();
        assert_eq!(small.saturating_sub(big), UsdAmount::ZERO);
    }
}
