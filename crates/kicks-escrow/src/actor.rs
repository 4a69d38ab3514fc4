//! # Actors
//!
//! Who performed a transition. Every event records its actor, and every edge
//! of the state machine is restricted to particular actors.

use std::str::FromStr;

use kicks_core::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The party performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A buyer account.
    Buyer(UserId),
    /// A seller account.
    Seller(UserId),
    /// A marketplace arbiter resolving disputes.
    Arbiter(UserId),
    /// The payment collaborator reporting a captured payment.
    PaymentProcessor,
    /// The auto-release sweep.
    Scheduler,
    /// The engine itself, e.g. immediate release for trusted sellers.
    System,
}

impl Actor {
    /// The role of this actor.
    pub fn role(&self) -> ActorRole {
        match self {
            Self::Buyer(_) => ActorRole::Buyer,
            Self::Seller(_) => ActorRole::Seller,
            Self::Arbiter(_) => ActorRole::Arbiter,
            Self::PaymentProcessor => ActorRole::PaymentProcessor,
            Self::Scheduler => ActorRole::Scheduler,
            Self::System => ActorRole::System,
        }
    }

    /// The user id, for actors that carry one.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Buyer(id) | Self::Seller(id) | Self::Arbiter(id) => Some(id),
            Self::PaymentProcessor | Self::Scheduler | Self::System => None,
        }
    }

    /// Build an actor from a role and optional id.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::MissingId`] when a buyer, seller or arbiter has
    /// no id.
    pub fn from_role(role: ActorRole, id: Option<UserId>) -> Result<Self, ActorError> {
        match role {
            ActorRole::Buyer => id.map(Self::Buyer).ok_or(ActorError::MissingId(role)),
            ActorRole::Seller => id.map(Self::Seller).ok_or(ActorError::MissingId(role)),
            ActorRole::Arbiter => id.map(Self::Arbiter).ok_or(ActorError::MissingId(role)),
            ActorRole::PaymentProcessor => Ok(Self::PaymentProcessor),
            ActorRole::Scheduler => Ok(Self::Scheduler),
            ActorRole::System => Ok(Self::System),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user_id() {
            Some(id) => write!(f, "{}:{id}", self.role()),
            None => f.write_str(self.role().as_str()),
        }
    }
}

/// Role of an actor, without identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Buyer.
    Buyer,
    /// Seller.
    Seller,
    /// Arbiter.
    Arbiter,
    /// Payment collaborator.
    PaymentProcessor,
    /// Release scheduler.
    Scheduler,
    /// Engine-internal.
    System,
}

impl ActorRole {
    /// The canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Arbiter => "arbiter",
            Self::PaymentProcessor => "payment_processor",
            Self::Scheduler => "scheduler",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = ActorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "arbiter" => Ok(Self::Arbiter),
            "payment_processor" => Ok(Self::PaymentProcessor),
            "scheduler" => Ok(Self::Scheduler),
            "system" => Ok(Self::System),
            _ => Err(ActorError::UnknownRole(s.to_string())),
        }
    }
}

/// Errors building an [`Actor`] from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// Role name not recognized.
    #[error("unknown actor role: \"{0}\"")]
    UnknownRole(String),
    /// A role that requires an id was given none.
    #[error("actor role {0} requires an id")]
    MissingId(ActorRole),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn display_includes_id_when_present() {
        assert_eq!(Actor::Buyer(uid("alice")).to_string(), "buyer:alice");
        assert_eq!(Actor::Scheduler.to_string(), "scheduler");
    }

    #[test]
    fn from_role_requires_id_for_parties() {
        assert_eq!(
            Actor::from_role(ActorRole::Seller, None).unwrap_err(),
            ActorError::MissingId(ActorRole::Seller)
        );
        assert_eq!(
            Actor::from_role(ActorRole::PaymentProcessor, None).unwrap(),
            Actor::PaymentProcessor
        );
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Arbiter".parse::<ActorRole>().unwrap(), ActorRole::Arbiter);
        assert!("admin".parse::<ActorRole>().is_err());
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(Actor::Seller(uid("bob"))).unwrap();
        assert_eq!(json, serde_json::json!({"role": "seller", "id": "bob"}));
        let json = serde_json::to_value(Actor::System).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system"}));
    }
}
