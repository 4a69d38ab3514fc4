//! # Fixed-Point Money
//!
//! Monetary amounts as a non-negative `i64` count of minor units (cents for
//! USD, yen for JPY) tagged with a [`Currency`].
//!
//! ## Security Invariant
//!
//! Financial amounts are never represented as floating-point numbers. Every
//! operation is checked integer arithmetic; overflow and currency mismatch are
//! errors, not wraps. Fee application rounds half-up exactly once, on the fee,
//! so that `amount - fee` and `fee` always sum back to `amount`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MoneyError;

// ── Currency ───────────────────────────────────────────────────────────

/// ISO 4217 currencies accepted by the marketplace.
///
/// The engine never converts between them; a transaction carries a single
/// currency for all of its amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US dollar.
    Usd,
    /// Euro.
    Eur,
    /// Pound sterling.
    Gbp,
    /// Canadian dollar.
    Cad,
    /// Australian dollar.
    Aud,
    /// Japanese yen (no minor unit).
    Jpy,
}

impl Currency {
    /// The three-letter ISO code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Cad => "CAD",
            Self::Aud => "AUD",
            Self::Jpy => "JPY",
        }
    }

    /// Number of fractional digits in the minor unit.
    pub fn exponent(&self) -> u32 {
        match self {
            Self::Jpy => 0,
            _ => 2,
        }
    }

    /// Display prefix used by [`format_amount`].
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Usd => "$",
            Self::Eur => "€",
            Self::Gbp => "£",
            Self::Cad => "CA$",
            Self::Aud => "A$",
            Self::Jpy => "¥",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            "GBP" => Ok(Self::Gbp),
            "CAD" => Ok(Self::Cad),
            "AUD" => Ok(Self::Aud),
            "JPY" => Ok(Self::Jpy),
            _ => Err(MoneyError::UnknownCurrency(s.to_string())),
        }
    }
}

// ── Money ──────────────────────────────────────────────────────────────

/// A non-negative amount of money in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMoney")]
pub struct Money {
    minor_units: i64,
    currency: Currency,
}

#[derive(Deserialize)]
struct RawMoney {
    minor_units: i64,
    currency: Currency,
}

impl TryFrom<RawMoney> for Money {
    type Error = MoneyError;

    fn try_from(raw: RawMoney) -> Result<Self, Self::Error> {
        Money::new(raw.minor_units, raw.currency)
    }
}

impl Money {
    /// Create an amount from minor units.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] for negative input.
    pub fn new(minor_units: i64, currency: Currency) -> Result<Self, MoneyError> {
        if minor_units < 0 {
            return Err(MoneyError::Negative(minor_units));
        }
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// The zero amount in `currency`.
    pub fn zero(currency: Currency) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    /// Parse an exact decimal string such as `"110.00"` or `"7"`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::InvalidDecimal`] for malformed input,
    /// [`MoneyError::Negative`] for a leading minus,
    /// [`MoneyError::TooManyFractionDigits`] when the input is more precise
    /// than the currency's minor unit, and [`MoneyError::Overflow`] when the
    /// value does not fit in `i64` minor units.
    pub fn parse(input: &str, currency: Currency) -> Result<Self, MoneyError> {
        let s = input.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || (body.contains('.') && frac_part.is_empty())
        {
            return Err(MoneyError::InvalidDecimal(input.to_string()));
        }
        let exponent = currency.exponent();
        if frac_part.len() > exponent as usize {
            return Err(MoneyError::TooManyFractionDigits {
                value: input.to_string(),
                currency: currency.code().to_string(),
                max_digits: exponent,
            });
        }

        let scale = 10_i64.pow(exponent);
        let whole: i64 = int_part
            .parse()
            .map_err(|_| MoneyError::Overflow("decimal parse"))?;
        let mut fraction: i64 = 0;
        if !frac_part.is_empty() {
            fraction = frac_part
                .parse()
                .map_err(|_| MoneyError::InvalidDecimal(input.to_string()))?;
            fraction *= 10_i64.pow(exponent - frac_part.len() as u32);
        }
        let minor = whole
            .checked_mul(scale)
            .and_then(|v| v.checked_add(fraction))
            .ok_or(MoneyError::Overflow("decimal parse"))?;
        if negative && minor != 0 {
            return Err(MoneyError::Negative(-minor));
        }
        Ok(Self {
            minor_units: minor,
            currency,
        })
    }

    /// Amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Currency of this amount.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Add two amounts of the same currency.
    ///
    /// # Errors
    ///
    /// [`MoneyError::CurrencyMismatch`] or [`MoneyError::Overflow`].
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::Overflow("addition"))?;
        Ok(Money {
            minor_units,
            currency: self.currency,
        })
    }

    /// Subtract `other` from `self`; the result may not go negative.
    ///
    /// # Errors
    ///
    /// [`MoneyError::CurrencyMismatch`] or [`MoneyError::Negative`].
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        Money::new(self.minor_units - other.minor_units, self.currency)
    }

    /// Apply a fee rate, rounding half-up to the nearest minor unit.
    ///
    /// The result never exceeds `self` because rates are capped at 100%.
    pub fn apply_rate(&self, rate: FeeRate) -> Money {
        let scaled = i128::from(self.minor_units) * i128::from(rate.basis_points());
        let denominator = i128::from(FeeRate::DENOMINATOR);
        let rounded = (scaled + denominator / 2) / denominator;
        Money {
            // rounded <= minor_units because basis_points <= DENOMINATOR.
            minor_units: rounded as i64,
            currency: self.currency,
        }
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.code().to_string(),
                right: other.currency.code().to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_amount(self))
    }
}

// ── Fee Rate ───────────────────────────────────────────────────────────

/// A percentage expressed in basis points (1/100th of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FeeRate(u32);

impl FeeRate {
    /// Basis points in 100%.
    pub const DENOMINATOR: u32 = 10_000;

    /// The marketplace's standard 10% platform fee.
    pub const STANDARD: FeeRate = FeeRate(1_000);

    /// Create a rate from basis points.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::InvalidFeeRate`] above 10000 bps.
    pub fn from_basis_points(bps: u32) -> Result<Self, MoneyError> {
        if bps > Self::DENOMINATOR {
            return Err(MoneyError::InvalidFeeRate(bps));
        }
        Ok(Self(bps))
    }

    /// Create a rate from a whole percentage.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::InvalidFeeRate`] above 100%.
    pub fn from_percent(percent: u32) -> Result<Self, MoneyError> {
        let bps = percent
            .checked_mul(100)
            .ok_or(MoneyError::InvalidFeeRate(u32::MAX))?;
        Self::from_basis_points(bps)
    }

    /// The rate in basis points.
    pub fn basis_points(&self) -> u32 {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl TryFrom<u32> for FeeRate {
    type Error = MoneyError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_basis_points(value)
    }
}

impl From<FeeRate> for u32 {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "{whole}%")
        } else if frac % 10 == 0 {
            write!(f, "{whole}.{}%", frac / 10)
        } else {
            write!(f, "{whole}.{frac:02}%")
        }
    }
}

// ── Formatting ─────────────────────────────────────────────────────────

/// Render an amount for display, e.g. `"$1,234.56"` or `"¥5,000"`.
pub fn format_amount(amount: &Money) -> String {
    let currency = amount.currency();
    let exponent = currency.exponent();
    let scale = 10_i64.pow(exponent);
    let whole = amount.minor_units() / scale;
    let fraction = amount.minor_units() % scale;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if exponent == 0 {
        format!("{}{grouped}", currency.symbol())
    } else {
        format!(
            "{}{grouped}.{fraction:0width$}",
            currency.symbol(),
            width = exponent as usize
        )
    }
}
