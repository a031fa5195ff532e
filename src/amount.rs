use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Largest supported decimal precision; `10^18` still fits in a `u64`.
pub const MAX_DECIMALS: u8 = 18;

/// Signed count of an asset's minor units.
///
/// The asset's decimal precision only matters at the edges (parsing input and
/// formatting output); all ledger arithmetic happens on the raw units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

/// Errors raised while parsing a decimal amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount '{value}' has more than {decimals} decimal places")]
    TooPrecise { value: String, decimals: u8 },
    #[error("amount '{0}' is out of range")]
    OutOfRange(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: i64) -> Self {
        Amount(units)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Amount(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Amount(self.0.saturating_sub(rhs.0))
    }

    /// Parse a decimal string such as `"12.50"` into minor units of an asset
    /// with `decimals` places of precision.
    pub fn parse(input: &str, decimals: u8) -> Result<Self, AmountError> {
        let value = input.trim();
        if value.is_empty() {
            return Err(AmountError::Empty);
        }
        if decimals > MAX_DECIMALS {
            return Err(AmountError::OutOfRange(value.to_string()));
        }

        let (negative, digits) = match value.as_bytes()[0] {
            b'-' => (true, &value[1..]),
            b'+' => (false, &value[1..]),
            _ => (false, value),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if frac.len() > decimals as usize {
            return Err(AmountError::TooPrecise {
                value: value.to_string(),
                decimals,
            });
        }

        let out_of_range = || AmountError::OutOfRange(value.to_string());
        let scale = 10i64.pow(decimals as u32);
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<i64>().map_err(|_| out_of_range())?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padding = 10i64.pow((decimals as usize - frac.len()) as u32);
            frac.parse::<i64>().map_err(|_| out_of_range())? * padding
        };

        let units = whole_units
            .checked_mul(scale)
            .and_then(|units| units.checked_add(frac_units))
            .ok_or_else(out_of_range)?;
        Ok(Amount(if negative { -units } else { units }))
    }

    /// Display the amount with the given decimal precision.
    pub fn scaled(self, decimals: u8) -> Scaled {
        Scaled {
            amount: self,
            decimals: decimals.min(MAX_DECIMALS),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An [`Amount`] paired with its asset precision, for display.
#[derive(Debug, Clone, Copy)]
pub struct Scaled {
    amount: Amount,
    decimals: u8,
}

impl fmt::Display for Scaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount.is_negative() { "-" } else { "" };
        let abs = self.amount.0.unsigned_abs();
        if self.decimals == 0 {
            return write!(f, "{sign}{abs}");
        }
        let scale = 10u64.pow(self.decimals as u32);
        let whole = abs / scale;
        let frac = abs % scale;
        let width = self.decimals as usize;
        write!(f, "{sign}{whole}.{frac:0width$}")
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}
