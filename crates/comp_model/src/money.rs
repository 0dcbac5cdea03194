//! Fixed-point money
//!
//! Balances are `u128` micro-dollars (1e6 = $1.00). Rates are basis points.
//! Configuration carries whole dollars and converts through [`usd`].

use std::fmt;
use thiserror::Error;

/// Amount in micro-dollars
pub type Money = u128;

/// Money scale (1e6 for $1.00)
pub const SCALE: u128 = 1_000_000;

const FRACTION_DIGITS: usize = 6;

/// Whole dollars to fixed-point money
pub const fn usd(dollars: u64) -> Money {
    dollars as u128 * SCALE
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is negative: {0}")]
    Negative(String),
    #[error("amount is not a number: {0}")]
    NotNumeric(String),
    #[error("amount has more than 6 decimal places: {0}")]
    TooPrecise(String),
    #[error("amount is too large: {0}")]
    Overflow(String),
}

/// Parse a decimal dollar string ("250", "99.5") into money
pub fn parse_usd(input: &str) -> Result<Money, AmountError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    if s.starts_with('-') {
        return Err(AmountError::Negative(s.to_string()));
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let digits_only = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_only(whole) || !digits_only(frac) {
        return Err(AmountError::NotNumeric(s.to_string()));
    }
    if frac.len() > FRACTION_DIGITS {
        return Err(AmountError::TooPrecise(s.to_string()));
    }

    let overflow = || AmountError::Overflow(s.to_string());
    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut frac_value: u128 = if frac.is_empty() {
        0
    } else {
        frac.parse().map_err(|_| overflow())?
    };
    for _ in frac.len()..FRACTION_DIGITS {
        frac_value *= 10;
    }

    whole_value
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or_else(overflow)
}

/// Display wrapper rendering money as `$1234.56`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usd(pub Money);

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = (self.0 % SCALE) / 10_000;
        write!(f, "${}.{:02}", self.0 / SCALE, cents)
    }
}
