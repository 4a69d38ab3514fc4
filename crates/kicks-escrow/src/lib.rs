//! # kicks-escrow: Escrow Transaction Engine
//!
//! Governs a marketplace order from payment capture to fund release or
//! refund.
//!
//! ## Components
//!
//! - **Status** ([`status`]): the eight escrow states and their legal edges.
//!   `released`, `refunded` and `cancelled` are terminal.
//!
//! - **Engine** ([`machine`]): every write. Snapshot, check actor and policy,
//!   compute the next record, commit under compare-and-swap.
//!
//! - **Store** ([`store`]): transactions and their hash-chained event logs
//!   ([`event`]). Corrupt records are flagged for reconciliation.
//!
//! - **Disputes** ([`dispute`]): reason catalog, submission validation and
//!   the dispute/cancel eligibility policy.
//!
//! - **Clock and scheduler** ([`clock`], [`scheduler`]): countdown
//!   projections and the idempotent auto-release sweep.
//!
//! - **Projections** ([`timeline`], [`ledger`]): read-only views of the event
//!   log and of a closed transaction's money movements.
//!
//! ## Lifecycle
//!
//! ```text
//! created ─► payment_held ─► shipped ─► delivered ─► released
//!                 │   │          │  │        │
//!                 │   └──────────┼──┴► disputed ─► released | refunded | cancelled
//!                 └► cancelled ◄─┘ (arbiter)
//! ```

pub mod actor;
pub mod clock;
pub mod config;
pub mod dispute;
pub mod error;
pub mod event;
pub mod ledger;
pub mod machine;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod timeline;
pub mod transaction;

// Re-export primary types.
pub use actor::{Actor, ActorError, ActorRole};
pub use clock::{
    escrow_countdown, escrow_expiry, escrow_progress, time_remaining, Clock, EscrowCountdown,
    ManualClock, SystemClock,
};
pub use config::{ConfigError, DisputeConfig, EngineConfig, SchedulerConfig};
pub use dispute::{
    can_cancel_order, can_open_dispute, dispute_catalog, validate_submission, CancelEligibility,
    CatalogEntry, Dispute, DisputeEligibility, DisputeReason, DisputeResolution,
    DisputeSubmission, EvidenceRef, ResolutionOutcome, CATALOG_VERSION,
};
pub use error::{EscrowError, FieldError};
pub use event::{verify_event_chain, Event, EventType, GENESIS_HASH};
pub use ledger::{settled_total, settlement_entries, Beneficiary, EntryKind, SettlementEntry};
pub use machine::{EscrowEngine, ReleaseOutcome};
pub use scheduler::{ReleaseScheduler, SweepReport};
pub use status::{valid_next_statuses, EscrowStatus, UnknownStatus};
pub use store::{FlaggedRecord, InMemoryStore, TransactionStore};
pub use timeline::{build_escrow_timeline, TimelineEntry};
pub use transaction::{compute_fee_split, EscrowTransaction, FeeSplit, NewTransaction};
