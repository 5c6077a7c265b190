//! Exact fixed-point coin amounts with eight fractional digits.
//!
//! Daemon RPC payloads carry amounts as JSON numbers. They are parsed from
//! their textual form (never through a float) and always rendered with
//! exactly eight decimals, so `sum(inputs) == amount + fee + change` holds
//! to the last base unit.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Number of fractional digits carried by an [`Amount`].
pub const DECIMALS: u32 = 8;

/// Base units per whole coin.
pub const COIN: i64 = 100_000_000;

/// A signed amount in base units (1e-8 of a coin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// One whole coin.
    pub const ONE: Self = Self(COIN);

    /// Create an amount from base units.
    #[must_use]
    pub const fn from_sats(sats: i64) -> Self {
        Self(sats)
    }

    /// Create an amount from whole coins.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAmount` on overflow.
    pub fn from_coins(coins: i64) -> Result<Self> {
        coins
            .checked_mul(COIN)
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount(format!("{coins} coins overflows")))
    }

    /// Value in base units.
    #[must_use]
    pub const fn sats(self) -> i64 {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is strictly negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction.
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Render as a JSON number with exactly eight decimals.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the rendered text is rejected by
    /// `serde_json`, which does not happen for well-formed amounts.
    pub fn to_json(self) -> Result<serde_json::Value> {
        let number = serde_json::Number::from_str(&self.to_string())
            .map_err(|e| Error::Serialization(format!("amount {self}: {e}")))?;
        Ok(serde_json::Value::Number(number))
    }

    /// Parse an amount from a JSON value (number or numeric string).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAmount` if the value is not numeric or carries
    /// more than eight significant decimals.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(n) => n.to_string().parse(),
            serde_json::Value::String(s) => s.parse(),
            other => Err(Error::InvalidAmount(format!("not a number: {other}"))),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let coin = COIN.unsigned_abs();
        write!(f, "{sign}{}.{:08}", abs / coin, abs % coin)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAmount(s.to_string());
        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        let (negative, unsigned) = match text.as_bytes()[0] {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };

        // Split off an exponent, as produced by float formatting ("1e-8").
        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = unsigned[pos + 1..].parse().map_err(|_| invalid())?;
                (&unsigned[..pos], exp)
            }
            None => (unsigned, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        // All digits as one integer, with the decimal point moved by the exponent.
        let digits: String = int_part.chars().chain(frac_part.chars()).collect();
        let frac_len = i32::try_from(frac_part.len()).map_err(|_| invalid())?;
        let scale = frac_len.checked_sub(exponent).ok_or_else(invalid)?;
        let decimals = i32::try_from(DECIMALS).map_err(|_| invalid())?;

        let trimmed = digits.trim_start_matches('0');
        let mut value: i128 = if trimmed.is_empty() {
            0
        } else {
            trimmed.parse().map_err(|_| invalid())?
        };

        if scale > decimals {
            // Excess precision is only acceptable when it is all zeros.
            let excess = u32::try_from(scale - decimals).map_err(|_| invalid())?;
            let divisor = 10_i128.checked_pow(excess).ok_or_else(invalid)?;
            if value % divisor != 0 {
                return Err(Error::InvalidAmount(format!(
                    "{s}: more than {DECIMALS} fractional digits"
                )));
            }
            value /= divisor;
        } else {
            let shift = decimals.checked_sub(scale).ok_or_else(invalid)?;
            let shift = u32::try_from(shift).map_err(|_| invalid())?;
            let factor = 10_i128.checked_pow(shift).ok_or_else(invalid)?;
            value = value.checked_mul(factor).ok_or_else(invalid)?;
        }

        if negative {
            value = -value;
        }
        i64::try_from(value).map(Self).map_err(|_| invalid())
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Serialized as a decimal string so it survives non-JSON formats (TOML);
/// RPC payloads use [`Amount::to_json`] instead.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}
