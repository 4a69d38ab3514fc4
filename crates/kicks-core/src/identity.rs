//! # Identifier Newtypes
//!
//! Orders and users are identified by foreign, stable strings issued by the
//! storefront and the identity provider. The engine never mints them; it only
//! validates their shape so that an empty or malformed id cannot become a
//! store key.
//!
//! Both types deserialize through `TryFrom<String>`, so invalid ids are
//! rejected at the API boundary rather than deep inside the state machine.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

fn validate(kind: &'static str, raw: String) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyIdentifier { kind });
    }
    if trimmed.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::IdentifierTooLong {
            kind,
            max: MAX_IDENTIFIER_LEN,
            len: trimmed.len(),
        });
    }
    let ok = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !ok {
        return Err(ValidationError::InvalidCharacters {
            kind,
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Identifier of a marketplace order. One escrow transaction exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    /// Create a validated order identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        validate("order_id", raw.into()).map(Self)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a buyer or seller account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a validated user identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        validate("user_id", raw.into()).map(Self)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
