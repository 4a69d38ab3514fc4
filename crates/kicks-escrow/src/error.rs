//! # Escrow Errors
//!
//! A single error enum for every engine operation. Policy refusals carry the
//! same human-readable reason that the eligibility checks report, so a caller
//! that skipped the check still learns why the action was refused.

use kicks_core::{MoneyError, OrderId, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::EscrowStatus;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the field, e.g. `evidence[1].content_type`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the escrow engine and its store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Amounts are negative, in mixed currencies, or overflow.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The requested edge does not exist from the current status.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current status.
        from: EscrowStatus,
        /// Requested status.
        to: EscrowStatus,
        /// Why the edge was refused.
        reason: String,
    },

    /// The stored record moved on between read and commit.
    #[error(
        "conflicting transition on order {order_id}: expected {expected_status} at version \
         {expected_version}, found {actual_status} at version {actual_version}"
    )]
    ConflictingTransition {
        /// Order whose commit lost the race.
        order_id: OrderId,
        /// Status the writer read.
        expected_status: EscrowStatus,
        /// Version the writer read.
        expected_version: u64,
        /// Status now stored.
        actual_status: EscrowStatus,
        /// Version now stored.
        actual_version: u64,
    },

    /// One or more input fields were rejected.
    #[error("validation failed: {}", summarize(.errors))]
    ValidationFailed {
        /// Every rejected field, in input order.
        errors: Vec<FieldError>,
    },

    /// Dispute policy refused to open a dispute.
    #[error("dispute not allowed: {reason}")]
    NotDisputable {
        /// Human-readable explanation.
        reason: String,
    },

    /// Cancellation policy refused to cancel.
    #[error("cancellation not allowed: {reason}")]
    NotCancellable {
        /// Human-readable explanation.
        reason: String,
    },

    /// The actor is not a party allowed to perform this action.
    #[error("{actor} is not permitted to {action}")]
    ActorNotPermitted {
        /// Rendered actor, e.g. `buyer:alice`.
        actor: String,
        /// The refused action.
        action: &'static str,
    },

    /// No transaction exists for the order.
    #[error("no escrow transaction for order {0}")]
    NotFound(OrderId),

    /// A transaction already exists for the order.
    #[error("escrow transaction already exists for order {0}")]
    AlreadyExists(OrderId),

    /// A stored record failed its invariants and is held for reconciliation.
    #[error("corrupt escrow record for order {order_id}: {detail}")]
    CorruptRecord {
        /// Affected order.
        order_id: OrderId,
        /// Which invariant failed.
        detail: String,
    },

    /// An event could not be brought into canonical form for hashing.
    #[error("event canonicalization failed: {0}")]
    Canonicalization(String),
}

impl EscrowError {
    /// Build a `ValidationFailed` for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            errors: vec![FieldError::new(field, message)],
        }
    }
}

impl From<MoneyError> for EscrowError {
    fn from(err: MoneyError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

impl From<ValidationError> for EscrowError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::EmptyIdentifier { kind }
            | ValidationError::IdentifierTooLong { kind, .. }
            | ValidationError::InvalidCharacters { kind, .. } => *kind,
        };
        Self::invalid_field(field, err.to_string())
    }
}
