//! # Escrow Status
//!
//! The eight lifecycle states of an escrow transaction and the transition
//! table between them.
//!
//! ```text
//! created ──▶ payment_held ──▶ shipped ──▶ delivered ──▶ released
//!                  │   │          │  │          │
//!                  │   └──────────┼──┼──────────┴──▶ disputed ──▶ released
//!                  │              │  └─────────────▶    │         refunded
//!                  ▼              ▼                     ▼         cancelled
//!              cancelled      cancelled             (arbiter)
//! ```
//!
//! `released`, `refunded` and `cancelled` are terminal. The table here says
//! which edges exist; who may walk them is decided by the engine and the
//! dispute/cancellation policy.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Record exists; payment not yet captured.
    Created,
    /// Buyer's funds captured and held by the platform.
    PaymentHeld,
    /// Seller has handed the item to a carrier.
    Shipped,
    /// Buyer confirmed receipt; the escrow window is running.
    Delivered,
    /// Buyer opened a dispute; the escrow window is frozen.
    Disputed,
    /// Funds paid out to the seller. Terminal.
    Released,
    /// Funds returned to the buyer after a dispute. Terminal.
    Refunded,
    /// Order cancelled and funds returned to the buyer. Terminal.
    Cancelled,
}

impl EscrowStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [EscrowStatus; 8] = [
        Self::Created,
        Self::PaymentHeld,
        Self::Shipped,
        Self::Delivered,
        Self::Disputed,
        Self::Released,
        Self::Refunded,
        Self::Cancelled,
    ];

    /// The canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PaymentHeld => "payment_held",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Disputed => "disputed",
            Self::Released => "released",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Cancelled)
    }

    /// Statuses reachable in one step.
    ///
    /// No wildcard arm: adding a status must force a decision here.
    pub fn valid_next_statuses(&self) -> &'static [EscrowStatus] {
        match self {
            Self::Created => &[Self::PaymentHeld],
            Self::PaymentHeld => &[Self::Shipped, Self::Cancelled, Self::Disputed],
            Self::Shipped => &[Self::Delivered, Self::Disputed, Self::Cancelled],
            Self::Delivered => &[Self::Released, Self::Disputed],
            Self::Disputed => &[Self::Released, Self::Refunded, Self::Cancelled],
            Self::Released | Self::Refunded | Self::Cancelled => &[],
        }
    }

    /// Whether `to` is reachable from `self` in one step.
    pub fn can_transition_to(&self, to: EscrowStatus) -> bool {
        self.valid_next_statuses().contains(&to)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known status name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown escrow status: \"{0}\"")]
pub struct UnknownStatus(pub String);

impl FromStr for EscrowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Free-function form of [`EscrowStatus::valid_next_statuses`].
pub fn valid_next_statuses(status: EscrowStatus) -> &'static [EscrowStatus] {
    status.valid_next_statuses()
}
