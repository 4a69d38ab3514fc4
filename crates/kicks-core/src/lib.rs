#![deny(missing_docs)]

//! # kicks-core: Foundational Types for the Kicks Marketplace
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies: only `serde` and `thiserror` from the ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Money is never a float.** [`Money`] is an `i64` count of minor units
//!    tagged with a [`Currency`]. Fee splits use integer arithmetic with
//!    explicit half-up rounding, so `payout + fee == total` holds exactly.
//!
//! 2. **Newtype wrappers for identifiers.** An [`OrderId`] cannot be passed
//!    where a [`UserId`] is expected. Both validate their format at
//!    construction and on deserialization.
//!
//! 3. **[`format_amount`] is the only presentation formatter.** Business logic
//!    never renders money; rendering never performs business logic.

pub mod error;
pub mod identity;
pub mod money;

pub use error::{MoneyError, ValidationError};
pub use identity::{OrderId, UserId};
pub use money::{format_amount, Currency, FeeRate, Money};
