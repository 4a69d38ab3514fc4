//! # Event Log
//!
//! Append-only, per-order log of everything that happened to a transaction.
//! Events are numbered from 1 and the transaction's `version` equals the
//! sequence of its latest event.
//!
//! ## Security Invariant
//!
//! Each event carries `event_hash = SHA-256(previous_hash || canonical(event))`
//! where the first event links to [`GENESIS_HASH`]. Any edit, deletion or
//! reordering of stored events breaks the chain, which
//! [`verify_event_chain`] detects on load.
//!
//! Canonical form is RFC 8785 (JCS) JSON, produced by `serde_jcs`.
//! Timestamps are truncated to microseconds when the event is built, so the
//! hash survives a round trip through PostgreSQL `timestamptz`.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use kicks_core::OrderId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::EscrowError;

/// Hash that the first event of every order links to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kinds of event in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Paid,
    Shipped,
    Delivered,
    EscrowStarted,
    Disputed,
    Released,
    Refunded,
    Cancelled,
}

impl EventType {
    /// The canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::EscrowStarted => "escrow_started",
            Self::Disputed => "disputed",
            Self::Released => "released",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type: \"{s}\""))
    }
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub order_id: OrderId,
    /// 1-based position in the order's log.
    pub sequence: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub payload: Value,
    pub previous_hash: String,
    pub event_hash: String,
}

/// An event that has not been placed in the chain yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub event_type: EventType,
    pub actor: Actor,
    pub payload: Value,
}

impl PendingEvent {
    /// An event with an empty payload.
    pub fn new(event_type: EventType, actor: Actor) -> Self {
        Self {
            event_type,
            actor,
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Place `pending` events after `head_hash` / `head_sequence`, stamping each
/// with `timestamp`.
///
/// # Errors
///
/// [`EscrowError::Canonicalization`] if an event cannot be hashed.
pub fn chain_events(
    order_id: &OrderId,
    head_hash: &str,
    head_sequence: u64,
    timestamp: DateTime<Utc>,
    pending: Vec<PendingEvent>,
) -> Result<Vec<Event>, EscrowError> {
    let timestamp = timestamp.trunc_subsecs(6);
    let mut previous_hash = head_hash.to_string();
    let mut sequence = head_sequence;
    let mut events = Vec::with_capacity(pending.len());
    for p in pending {
        sequence += 1;
        let event_hash = compute_event_hash(
            &previous_hash,
            order_id,
            sequence,
            p.event_type,
            &timestamp,
            &p.actor,
            &p.payload,
        )?;
        events.push(Event {
            event_id: Uuid::new_v4(),
            order_id: order_id.clone(),
            sequence,
            event_type: p.event_type,
            timestamp,
            actor: p.actor,
            payload: p.payload,
            previous_hash: std::mem::replace(&mut previous_hash, event_hash.clone()),
            event_hash,
        });
    }
    Ok(events)
}

/// Hash of the last event, or [`GENESIS_HASH`] for an empty log.
pub fn head_hash(events: &[Event]) -> &str {
    events.last().map_or(GENESIS_HASH, |e| e.event_hash.as_str())
}

/// Fields covered by `event_hash`. `event_id` is not among them.
#[derive(Serialize)]
struct HashedFields<'a> {
    order_id: &'a str,
    sequence: u64,
    event_type: &'a str,
    timestamp: &'a str,
    actor: &'a Actor,
    payload: &'a Value,
}

fn compute_event_hash(
    previous_hash: &str,
    order_id: &OrderId,
    sequence: u64,
    event_type: EventType,
    timestamp: &DateTime<Utc>,
    actor: &Actor,
    payload: &Value,
) -> Result<String, EscrowError> {
    let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
    let body = HashedFields {
        order_id: order_id.as_str(),
        sequence,
        event_type: event_type.as_str(),
        timestamp: &timestamp,
        actor,
        payload,
    };
    let canonical = serde_jcs::to_string(&body)
        .map_err(|e| EscrowError::Canonicalization(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Recompute the chain and check sequence continuity.
///
/// # Errors
///
/// [`EscrowError::CorruptRecord`] at the first broken link.
pub fn verify_event_chain(order_id: &OrderId, events: &[Event]) -> Result<(), EscrowError> {
    let corrupt = |detail: String| EscrowError::CorruptRecord {
        order_id: order_id.clone(),
        detail,
    };
    let mut previous = GENESIS_HASH.to_string();
    for (i, event) in events.iter().enumerate() {
        let expected_sequence = i as u64 + 1;
        if event.order_id != *order_id {
            return Err(corrupt(format!(
                "event {} belongs to order {}",
                event.sequence, event.order_id
            )));
        }
        if event.sequence != expected_sequence {
            return Err(corrupt(format!(
                "event sequence {} where {expected_sequence} was expected",
                event.sequence
            )));
        }
        if event.previous_hash != previous {
            return Err(corrupt(format!(
                "event {} does not link to its predecessor",
                event.sequence
            )));
        }
        let recomputed = compute_event_hash(
            &event.previous_hash,
            &event.order_id,
            event.sequence,
            event.event_type,
            &event.timestamp,
            &event.actor,
            &event.payload,
        )
        .map_err(|e| corrupt(e.to_string()))?;
        if recomputed != event.event_hash {
            return Err(corrupt(format!("event {} hash mismatch", event.sequence)));
        }
        previous = event.event_hash.clone();
    }
    Ok(())
}
