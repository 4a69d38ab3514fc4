//! # Error Hierarchy
//!
//! Structured error types for the foundational primitives, built with
//! `thiserror`. Each variant carries the offending input so that callers can
//! report exactly what was rejected.

use thiserror::Error;

/// Errors raised while constructing or combining monetary amounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Amounts held in escrow are never negative.
    #[error("amount must not be negative: {0} minor units")]
    Negative(i64),

    /// Two amounts in different currencies were combined.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },

    /// Arithmetic left the representable range.
    #[error("amount overflow while computing {0}")]
    Overflow(&'static str),

    /// Decimal string could not be parsed.
    #[error("invalid decimal amount: \"{0}\"")]
    InvalidDecimal(String),

    /// Decimal string has more fractional digits than the currency allows.
    #[error("amount \"{value}\" has more than {max_digits} fractional digits for {currency}")]
    TooManyFractionDigits {
        /// The rejected input.
        value: String,
        /// The currency code.
        currency: String,
        /// Minor-unit exponent of the currency.
        max_digits: u32,
    },

    /// Fee rate outside `0..=10000` basis points.
    #[error("fee rate must be between 0 and 10000 basis points, got {0}")]
    InvalidFeeRate(u32),

    /// Currency code is not in the supported set.
    #[error("unsupported currency code: \"{0}\"")]
    UnknownCurrency(String),
}

/// Validation errors for identifier newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier is empty or whitespace.
    #[error("{kind} must not be empty")]
    EmptyIdentifier {
        /// Which identifier kind was rejected.
        kind: &'static str,
    },

    /// Identifier exceeds the maximum length.
    #[error("{kind} must be at most {max} characters, got {len}")]
    IdentifierTooLong {
        /// Which identifier kind was rejected.
        kind: &'static str,
        /// Maximum permitted length.
        max: usize,
        /// Actual length.
        len: usize,
    },

    /// Identifier contains characters outside `[A-Za-z0-9._:-]`.
    #[error("{kind} contains invalid characters: \"{value}\"")]
    InvalidCharacters {
        /// Which identifier kind was rejected.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}
