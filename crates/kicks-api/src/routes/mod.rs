//! # API Route Modules
//!
//! | Module | Prefix | Purpose |
//! |---|---|---|
//! | [`transactions`] | `/v1/escrow/transactions` | Lifecycle, timeline, events, settlement |
//! | [`disputes`] | `/v1/escrow/transactions/{id}/disputes` | Open and resolve disputes |
//! | [`reference`] | `/v1/escrow/statuses`, `/v1/escrow/dispute-reasons` | Status graph and reason catalog |
//! | [`sweep`] | `/v1/escrow/sweep` | On-demand release sweep |

pub mod disputes;
pub mod reference;
pub mod sweep;
pub mod transactions;
