use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

/// Errors that can occur when parsing an [`Amount`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not carry a sign: '{0}'")]
    Signed(String),

    #[error("invalid character '{0}' in amount")]
    InvalidChar(char),

    #[error("amount has {0} decimal places, at most 4 are supported")]
    TooPrecise(usize),

    #[error("amount is too large")]
    Overflow,
}

impl Amount {
    const SCALE: i64 = 10_000;
    const DECIMALS: usize = 4;

    pub const ZERO: Amount = Amount(0);

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Amount(self.0.saturating_add(rhs.0))
    }

    /// Accumulate decimal digits into `acc`, rejecting anything that is not `0-9`.
    fn push_digits(mut acc: i64, digits: &str) -> Result<i64, AmountError> {
        for c in digits.chars() {
            let digit = c.to_digit(10).ok_or(AmountError::InvalidChar(c))?;
            acc = acc
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(digit)))
                .ok_or(AmountError::Overflow)?;
        }
        Ok(acc)
    }
}

/// Exact parsing, no floating point involved.
///
/// Accepts `1`, `1.`, `1.5` and `.5`. Zeros past the 4th fractional digit
/// are dropped (`1.00000`); any other 5th digit, signs and exponents are rejected.
impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(['-', '+']) {
            return Err(AmountError::Signed(s.to_string()));
        }

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Empty);
        }
        let frac = if frac.len() > Self::DECIMALS {
            if !frac.bytes().skip(Self::DECIMALS).all(|b| b == b'0') {
                return Err(AmountError::TooPrecise(frac.len()));
            }
            // only ascii zeros follow, so this is a char boundary
            &frac[..Self::DECIMALS]
        } else {
            frac
        };

        let whole = Self::push_digits(0, whole)?
            .checked_mul(Self::SCALE)
            .ok_or(AmountError::Overflow)?;
        // right-pad the fraction so "5" reads as 5000
        let frac = Self::push_digits(0, frac)? * 10_i64.pow((Self::DECIMALS - frac.len()) as u32);

        whole
            .checked_add(frac)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = abs % Self::SCALE as u64;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}
