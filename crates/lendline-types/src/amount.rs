use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of fractional decimal digits in the ledger's native unit.
pub const DECIMALS: u32 = 18;

const ONE: u128 = 10u128.pow(DECIMALS);

/// A monetary amount in the ledger's smallest unit (18-decimal fixed point).
///
/// The value is exact; decimal text only appears at the boundary through
/// [`Amount::parse_decimal`] and [`Amount::to_decimal_string`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_wei(wei: u128) -> Self {
        Self(wei)
    }

    /// Whole units, e.g. `Amount::from_units(3)` is `3.0`.
    pub fn from_units(units: u64) -> Self {
        Self(units as u128 * ONE)
    }

    pub const fn as_wei(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Parse a non-negative decimal string such as `"1.5"` or `"0.000000000000000001"`.
    pub fn parse_decimal(input: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidAmount {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let s = input.trim();
        if s.is_empty() {
            return Err(invalid("empty"));
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("expected digits with an optional '.'"));
        }
        if frac.len() > DECIMALS as usize {
            return Err(invalid("more than 18 fractional digits"));
        }

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| TypeError::AmountOverflow)?
        };
        let frac_value: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<18}");
            padded.parse().map_err(|_| TypeError::AmountOverflow)?
        };

        whole_value
            .checked_mul(ONE)
            .and_then(|w| w.checked_add(frac_value))
            .map(Self)
            .ok_or(TypeError::AmountOverflow)
    }

    /// Decimal form with trailing fractional zeros trimmed.
    pub fn to_decimal_string(&self) -> String {
        let whole = self.0 / ONE;
        let frac = self.0 % ONE;
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{frac:018}");
        format!("{whole}.{}", frac.trim_end_matches('0'))
    }

    /// `self / total` as a ratio in `[0, 1]`; zero when `total` is zero.
    pub fn ratio_of(&self, total: Amount) -> f64 {
        if total.0 == 0 {
            return 0.0;
        }
        (self.0 as f64 / total.0 as f64).clamp(0.0, 1.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}
