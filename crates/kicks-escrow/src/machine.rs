//! # Escrow Engine
//!
//! The write path. Every operation follows the same shape:
//!
//! 1. Take a [`Snapshot`] of the transaction.
//! 2. Check the actor, the policy and the status edge.
//! 3. Compute the next record as a new value, with its events.
//! 4. [`TransactionStore::commit`] both under compare-and-swap.
//!
//! A failure at any step leaves the stored record untouched. A lost race in
//! step 4 surfaces as [`EscrowError::ConflictingTransition`]; the engine never
//! retries on behalf of interactive callers.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use kicks_core::{OrderId, UserId};
use serde_json::json;

use crate::actor::{Actor, ActorRole};
use crate::clock::{escrow_countdown, escrow_expiry, Clock, EscrowCountdown, SystemClock};
use crate::config::EngineConfig;
use crate::dispute::{
    can_cancel_order, can_open_dispute, validate_submission, Dispute, DisputeResolution,
    DisputeSubmission, ResolutionOutcome,
};
use crate::error::EscrowError;
use crate::event::{chain_events, Event, EventType, PendingEvent, GENESIS_HASH};
use crate::ledger::{settlement_entries, SettlementEntry};
use crate::status::EscrowStatus;
use crate::store::{Expected, InMemoryStore, Snapshot, TransactionStore};
use crate::timeline::{build_escrow_timeline, TimelineEntry};
use crate::transaction::{EscrowTransaction, NewTransaction};

/// Longest accepted tracking number.
pub const MAX_TRACKING_NUMBER_LEN: usize = 64;

/// Longest accepted arbiter or cancellation note, in characters.
pub const MAX_NOTE_CHARS: usize = 2000;

/// Result of one auto-release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The transaction was released by this call.
    Released(Box<EscrowTransaction>),
    /// Nothing to do; the reason says why.
    Skipped(String),
}

/// The escrow state machine bound to a store, a clock and configuration.
#[derive(Clone)]
pub struct EscrowEngine {
    store: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for EscrowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowEngine")
            .field("transactions", &self.store.len())
            .field("config", &self.config)
            .finish()
    }
}

fn require_edge(tx: &EscrowTransaction, to: EscrowStatus) -> Result<(), EscrowError> {
    if tx.status.can_transition_to(to) {
        return Ok(());
    }
    let reason = if tx.status.is_terminal() {
        format!("transaction is already {}", tx.status)
    } else {
        format!("{to} is not reachable from {}", tx.status)
    };
    Err(EscrowError::InvalidTransition {
        from: tx.status,
        to,
        reason,
    })
}

fn require_party(
    actor: &Actor,
    role: ActorRole,
    party: &UserId,
    action: &'static str,
) -> Result<(), EscrowError> {
    if actor.role() == role && actor.user_id() == Some(party) {
        return Ok(());
    }
    Err(EscrowError::ActorNotPermitted {
        actor: actor.to_string(),
        action,
    })
}

fn require_role(actor: &Actor, role: ActorRole, action: &'static str) -> Result<(), EscrowError> {
    if actor.role() == role {
        return Ok(());
    }
    Err(EscrowError::ActorNotPermitted {
        actor: actor.to_string(),
        action,
    })
}

fn clean_note(field: &'static str, note: Option<String>) -> Result<Option<String>, EscrowError> {
    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if let Some(n) = &note {
        if n.chars().count() > MAX_NOTE_CHARS {
            return Err(EscrowError::invalid_field(
                field,
                format!("must be at most {MAX_NOTE_CHARS} characters"),
            ));
        }
    }
    Ok(note)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl EscrowEngine {
    /// Bind an engine to its collaborators.
    pub fn new(
        store: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config: Arc::new(config),
        }
    }

    /// An engine over a fresh in-memory store and the system clock.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(SystemClock), config)
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time, at the precision events are stored with.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    fn commit(
        &self,
        snapshot: &Snapshot,
        mut next: EscrowTransaction,
        pending: Vec<PendingEvent>,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let before = &snapshot.transaction;
        let actor = pending
            .first()
            .map(|p| p.actor.to_string())
            .unwrap_or_default();
        let events = chain_events(
            &before.order_id,
            &snapshot.head_hash,
            before.version,
            now,
            pending,
        )?;
        next.version = before.version + events.len() as u64;
        next.updated_at = now;
        if next.status.is_terminal() && next.closed_at.is_none() {
            next.closed_at = Some(now);
        }
        self.store.commit(Expected::of(before), next.clone(), events)?;
        tracing::info!(
            order_id = %next.order_id,
            from = %before.status,
            to = %next.status,
            actor = %actor,
            version = next.version,
            "escrow transition committed"
        );
        Ok(next)
    }

    // ── Write operations ───────────────────────────────────────────────

    /// Open an escrow hold for a captured payment.
    ///
    /// The record is created and moved to `payment_held` in one insert, with
    /// `created` and `paid` events.
    pub fn create_transaction(
        &self,
        new: NewTransaction,
        actor: &Actor,
    ) -> Result<EscrowTransaction, EscrowError> {
        require_role(actor, ActorRole::PaymentProcessor, "open an escrow hold")?;
        let now = self.now();
        let fee_rate = new.fee_rate.unwrap_or_else(|| self.config.default_fee_rate());
        let escrow_days = new.escrow_days.unwrap_or(self.config.default_escrow_days);
        if escrow_days > self.config.max_escrow_days {
            return Err(EscrowError::invalid_field(
                "escrow_days",
                format!(
                    "must be at most {}, got {escrow_days}",
                    self.config.max_escrow_days
                ),
            ));
        }

        let mut tx = EscrowTransaction::open(&new, fee_rate, escrow_days, now)?;
        require_edge(&tx, EscrowStatus::PaymentHeld)?;
        let payment_reference = new.payment_reference.filter(|r| !r.trim().is_empty());
        let events = chain_events(
            &tx.order_id,
            GENESIS_HASH,
            0,
            now,
            vec![
                PendingEvent::new(EventType::Created, actor.clone()).with_payload(json!({
                    "item_amount": tx.item_amount,
                    "shipping_amount": tx.shipping_amount,
                    "total_amount": tx.total_amount,
                    "platform_fee": tx.platform_fee,
                    "seller_payout": tx.seller_payout,
                    "fee_rate_bps": tx.fee_rate.basis_points(),
                    "escrow_days": tx.escrow_days,
                })),
                PendingEvent::new(EventType::Paid, actor.clone())
                    .with_payload(json!({ "payment_reference": payment_reference })),
            ],
        )?;
        tx.status = EscrowStatus::PaymentHeld;
        tx.version = events.len() as u64;

        self.store.insert(tx.clone(), events)?;
        tracing::info!(
            order_id = %tx.order_id,
            total = %tx.total_amount,
            escrow_days = tx.escrow_days,
            "escrow hold opened"
        );
        Ok(tx)
    }

    /// Seller hands the item to a carrier.
    pub fn mark_shipped(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        tracking_number: Option<String>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        require_party(actor, ActorRole::Seller, &tx.seller_id, "mark this order shipped")?;
        require_edge(tx, EscrowStatus::Shipped)?;

        let tracking_number = tracking_number
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if let Some(t) = &tracking_number {
            if t.len() > MAX_TRACKING_NUMBER_LEN {
                return Err(EscrowError::invalid_field(
                    "tracking_number",
                    format!("must be at most {MAX_TRACKING_NUMBER_LEN} characters"),
                ));
            }
        }

        let mut next = tx.clone();
        next.status = EscrowStatus::Shipped;
        next.shipped_at = Some(now);
        next.tracking_number = tracking_number.clone();
        let event = PendingEvent::new(EventType::Shipped, actor.clone())
            .with_payload(json!({ "tracking_number": tracking_number }));
        self.commit(&snapshot, next, vec![event], now)
    }

    /// Buyer confirms receipt. Starts the escrow window, or releases at once
    /// when `escrow_days` is zero.
    pub fn confirm_delivery(
        &self,
        order_id: &OrderId,
        actor: &Actor,
    ) -> Result<EscrowTransaction, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        require_party(actor, ActorRole::Buyer, &tx.buyer_id, "confirm delivery of this order")?;
        require_edge(tx, EscrowStatus::Delivered)?;

        let mut next = tx.clone();
        next.status = EscrowStatus::Delivered;
        next.delivered_at = Some(now);
        let mut events = vec![PendingEvent::new(EventType::Delivered, actor.clone())];

        if tx.escrow_days == 0 {
            require_edge(&next, EscrowStatus::Released)?;
            next.status = EscrowStatus::Released;
            events.push(
                PendingEvent::new(EventType::Released, Actor::System).with_payload(json!({
                    "trigger": "trusted_seller",
                    "seller_payout": tx.seller_payout,
                    "platform_fee": tx.platform_fee,
                })),
            );
        } else {
            let expires_at = escrow_expiry(now, tx.escrow_days).ok_or_else(|| {
                EscrowError::invalid_field("escrow_days", "escrow window exceeds the calendar")
            })?;
            next.escrow_expires_at = Some(expires_at);
            events.push(
                PendingEvent::new(EventType::EscrowStarted, Actor::System).with_payload(json!({
                    "escrow_days": tx.escrow_days,
                    "escrow_expires_at": rfc3339(expires_at),
                })),
            );
        }
        self.commit(&snapshot, next, events, now)
    }

    /// Buyer opens a dispute, freezing the escrow window.
    pub fn open_dispute(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        submission: &DisputeSubmission,
    ) -> Result<EscrowTransaction, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        require_party(actor, ActorRole::Buyer, &tx.buyer_id, "open a dispute on this order")?;

        let eligibility = can_open_dispute(tx);
        if !eligibility.can_dispute {
            return Err(EscrowError::NotDisputable {
                reason: eligibility.reason.unwrap_or_default(),
            });
        }
        let valid = validate_submission(submission, &self.config.dispute)?;
        require_edge(tx, EscrowStatus::Disputed)?;

        let mut next = tx.clone();
        next.status = EscrowStatus::Disputed;
        let event = PendingEvent::new(EventType::Disputed, actor.clone()).with_payload(json!({
            "reason": valid.reason.code(),
            "evidence_count": valid.evidence.len(),
        }));
        next.dispute = Some(Dispute {
            reason: valid.reason,
            description: valid.description,
            evidence_refs: valid.evidence,
            opened_at: now,
            opened_by: actor.clone(),
            resolved_at: None,
            resolution: None,
        });
        self.commit(&snapshot, next, vec![event], now)
    }

    /// Cancel an order and refund the buyer.
    pub fn cancel_order(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        match actor.role() {
            ActorRole::Buyer => {
                require_party(actor, ActorRole::Buyer, &tx.buyer_id, "cancel this order")?
            }
            ActorRole::Seller => {
                require_party(actor, ActorRole::Seller, &tx.seller_id, "cancel this order")?
            }
            _ => {}
        }

        let eligibility = can_cancel_order(tx, actor.role());
        if !eligibility.can_cancel {
            return Err(EscrowError::NotCancellable {
                reason: eligibility.reason.unwrap_or_default(),
            });
        }
        require_edge(tx, EscrowStatus::Cancelled)?;
        let note = clean_note("note", note)?;

        let mut next = tx.clone();
        next.status = EscrowStatus::Cancelled;
        let event = PendingEvent::new(EventType::Cancelled, actor.clone()).with_payload(json!({
            "cancelled_from": tx.status,
            "note": note,
        }));
        self.commit(&snapshot, next, vec![event], now)
    }

    /// Arbiter closes a dispute. The only way out of `disputed`.
    pub fn resolve_dispute(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        outcome: ResolutionOutcome,
        note: Option<String>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        require_role(actor, ActorRole::Arbiter, "resolve disputes")?;
        let to = outcome.target_status();
        if tx.status != EscrowStatus::Disputed {
            return Err(EscrowError::InvalidTransition {
                from: tx.status,
                to,
                reason: "there is no open dispute to resolve".to_string(),
            });
        }
        require_edge(tx, to)?;
        let note = clean_note("note", note)?;

        let mut next = tx.clone();
        let mut dispute = next.dispute.take().ok_or_else(|| EscrowError::CorruptRecord {
            order_id: tx.order_id.clone(),
            detail: "disputed without a dispute record".to_string(),
        })?;
        dispute.resolved_at = Some(now);
        dispute.resolution = Some(DisputeResolution {
            outcome,
            note: note.clone(),
            resolved_by: actor.clone(),
        });
        next.dispute = Some(dispute);
        next.status = to;

        let event_type = match outcome {
            ResolutionOutcome::Released => EventType::Released,
            ResolutionOutcome::Refunded => EventType::Refunded,
            ResolutionOutcome::Cancelled => EventType::Cancelled,
        };
        let event = PendingEvent::new(event_type, actor.clone()).with_payload(json!({
            "trigger": "dispute_resolution",
            "outcome": outcome,
            "note": note,
        }));
        self.commit(&snapshot, next, vec![event], now)
    }

    /// Release one transaction if its window has closed.
    ///
    /// Re-reads the record first, so a dispute committed since the sweep's
    /// scan wins and the release is skipped.
    pub fn release_if_due(&self, order_id: &OrderId) -> Result<ReleaseOutcome, EscrowError> {
        let now = self.now();
        let snapshot = self.store.snapshot(order_id)?;
        let tx = &snapshot.transaction;
        if tx.status != EscrowStatus::Delivered {
            return Ok(ReleaseOutcome::Skipped(format!("status is {}", tx.status)));
        }
        if tx.has_open_dispute() {
            return Ok(ReleaseOutcome::Skipped("a dispute is open".to_string()));
        }
        match tx.escrow_expires_at {
            None => return Ok(ReleaseOutcome::Skipped("no escrow window".to_string())),
            Some(at) if at > now => {
                return Ok(ReleaseOutcome::Skipped(format!(
                    "window open until {}",
                    rfc3339(at)
                )))
            }
            Some(_) => {}
        }
        require_edge(tx, EscrowStatus::Released)?;

        let mut next = tx.clone();
        next.status = EscrowStatus::Released;
        let event = PendingEvent::new(EventType::Released, Actor::Scheduler).with_payload(json!({
            "trigger": "escrow_expired",
            "seller_payout": tx.seller_payout,
            "platform_fee": tx.platform_fee,
        }));
        let released = self.commit(&snapshot, next, vec![event], now)?;
        Ok(ReleaseOutcome::Released(Box::new(released)))
    }

    // ── Read operations ────────────────────────────────────────────────

    /// Current record.
    pub fn get_transaction(&self, order_id: &OrderId) -> Result<EscrowTransaction, EscrowError> {
        self.store.get(order_id)
    }

    /// Raw event log.
    pub fn events(&self, order_id: &OrderId) -> Result<Vec<Event>, EscrowError> {
        self.store.events(order_id)
    }

    /// Timeline projection of the event log.
    pub fn timeline(&self, order_id: &OrderId) -> Result<Vec<TimelineEntry>, EscrowError> {
        Ok(build_escrow_timeline(&self.store.events(order_id)?))
    }

    /// Countdown projection at the current time.
    pub fn countdown(&self, order_id: &OrderId) -> Result<Option<EscrowCountdown>, EscrowError> {
        let tx = self.store.get(order_id)?;
        Ok(escrow_countdown(
            &tx,
            self.clock.now(),
            self.config.near_expiry_threshold,
        ))
    }

    /// Ledger entries for a closed transaction.
    pub fn settlement(&self, order_id: &OrderId) -> Result<Vec<SettlementEntry>, EscrowError> {
        Ok(settlement_entries(&self.store.get(order_id)?))
    }
}
