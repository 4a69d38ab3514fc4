//! # Transaction Store
//!
//! Durable home of each order's [`EscrowTransaction`] and its event log.
//!
//! ## Concurrency
//!
//! Writers never overwrite blindly. [`TransactionStore::commit`] is a
//! compare-and-swap on `(order_id, expected_status, expected_version)`: the
//! new record and its events land together only if nothing else committed
//! since the writer's snapshot. Otherwise the writer gets
//! [`EscrowError::ConflictingTransition`] and must re-read.
//!
//! ## Corruption
//!
//! Records that fail their invariants on read or restore are moved to a
//! reconciliation list and every later read reports them as corrupt. They are
//! never rewritten by the engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kicks_core::OrderId;
use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::error::EscrowError;
use crate::event::{head_hash, verify_event_chain, Event};
use crate::status::EscrowStatus;
use crate::transaction::EscrowTransaction;

/// A consistent read of a transaction and the head of its event chain.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub transaction: EscrowTransaction,
    pub head_hash: String,
}

/// What the writer believed was stored when it computed its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: EscrowStatus,
    pub version: u64,
}

impl Expected {
    /// Expectation matching `tx` as read.
    pub fn of(tx: &EscrowTransaction) -> Self {
        Self {
            status: tx.status,
            version: tx.version,
        }
    }
}

/// A record held for manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedRecord {
    pub order_id: OrderId,
    pub detail: String,
    pub flagged_at: DateTime<Utc>,
}

/// Storage for escrow transactions and their event logs.
pub trait TransactionStore: Send + Sync {
    /// Store a new transaction with its initial events.
    fn insert(&self, tx: EscrowTransaction, events: Vec<Event>) -> Result<(), EscrowError>;

    /// Current record.
    fn get(&self, order_id: &OrderId) -> Result<EscrowTransaction, EscrowError>;

    /// Current record plus the hash its next event must link to.
    fn snapshot(&self, order_id: &OrderId) -> Result<Snapshot, EscrowError>;

    /// Full event log in sequence order.
    fn events(&self, order_id: &OrderId) -> Result<Vec<Event>, EscrowError>;

    /// Replace the record and append events if it is still as `expected`.
    fn commit(
        &self,
        expected: Expected,
        tx: EscrowTransaction,
        events: Vec<Event>,
    ) -> Result<(), EscrowError>;

    /// Orders in `delivered` whose window closed at or before `now`.
    fn list_due_for_release(&self, now: DateTime<Utc>) -> Vec<OrderId>;

    /// Load a persisted record at startup. Records that fail verification are
    /// flagged instead of loaded, and the error is returned.
    fn restore(&self, tx: EscrowTransaction, events: Vec<Event>) -> Result<(), EscrowError>;

    /// Hold an order for reconciliation.
    fn flag_for_reconciliation(&self, order_id: &OrderId, detail: String);

    /// Every held order.
    fn flagged(&self) -> Vec<FlaggedRecord>;

    /// Number of loaded transactions.
    fn len(&self) -> usize;

    /// Whether no transactions are loaded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    tx: EscrowTransaction,
    events: Vec<Event>,
}

/// In-memory store guarded by a `parking_lot::RwLock`.
///
/// The clock stamps reconciliation flags. Give it the engine's clock.
pub struct InMemoryStore {
    entries: RwLock<HashMap<OrderId, Entry>>,
    flagged: RwLock<HashMap<OrderId, FlaggedRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &self.entries.read().len())
            .field("flagged", &self.flagged.read().len())
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that stamps flags with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flagged: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn check_flagged(&self, order_id: &OrderId) -> Result<(), EscrowError> {
        match self.flagged.read().get(order_id) {
            Some(record) => Err(EscrowError::CorruptRecord {
                order_id: order_id.clone(),
                detail: record.detail.clone(),
            }),
            None => Ok(()),
        }
    }

    fn read_entry(&self, order_id: &OrderId) -> Result<Entry, EscrowError> {
        self.check_flagged(order_id)?;
        let entry = self
            .entries
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| EscrowError::NotFound(order_id.clone()))?;
        if let Err(err) = entry.tx.verify_invariants() {
            if let EscrowError::CorruptRecord { detail, .. } = &err {
                self.flag_for_reconciliation(order_id, detail.clone());
            }
            return Err(err);
        }
        Ok(entry)
    }
}

fn check_appended(current: &Entry, events: &[Event], tx: &EscrowTransaction) -> Result<(), String> {
    let mut expected_sequence = current.tx.version;
    let mut expected_link = head_hash(&current.events).to_string();
    for e in events {
        expected_sequence += 1;
        if e.sequence != expected_sequence || e.previous_hash != expected_link {
            return Err(format!("event {} does not extend the log", e.sequence));
        }
        expected_link = e.event_hash.clone();
    }
    if tx.version != expected_sequence {
        return Err(format!(
            "version {} does not match event count {expected_sequence}",
            tx.version
        ));
    }
    Ok(())
}

impl TransactionStore for InMemoryStore {
    fn insert(&self, tx: EscrowTransaction, events: Vec<Event>) -> Result<(), EscrowError> {
        tx.verify_invariants()?;
        verify_event_chain(&tx.order_id, &events)?;
        if tx.version != events.len() as u64 {
            return Err(EscrowError::CorruptRecord {
                order_id: tx.order_id.clone(),
                detail: "version does not match event count".to_string(),
            });
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&tx.order_id) || self.flagged.read().contains_key(&tx.order_id) {
            return Err(EscrowError::AlreadyExists(tx.order_id));
        }
        entries.insert(tx.order_id.clone(), Entry { tx, events });
        Ok(())
    }

    fn get(&self, order_id: &OrderId) -> Result<EscrowTransaction, EscrowError> {
        self.read_entry(order_id).map(|e| e.tx)
    }

    fn snapshot(&self, order_id: &OrderId) -> Result<Snapshot, EscrowError> {
        let entry = self.read_entry(order_id)?;
        Ok(Snapshot {
            head_hash: head_hash(&entry.events).to_string(),
            transaction: entry.tx,
        })
    }

    fn events(&self, order_id: &OrderId) -> Result<Vec<Event>, EscrowError> {
        self.read_entry(order_id).map(|e| e.events)
    }

    fn commit(
        &self,
        expected: Expected,
        tx: EscrowTransaction,
        events: Vec<Event>,
    ) -> Result<(), EscrowError> {
        self.check_flagged(&tx.order_id)?;
        tx.verify_invariants()?;
        let mut entries = self.entries.write();
        let current = entries
            .get_mut(&tx.order_id)
            .ok_or_else(|| EscrowError::NotFound(tx.order_id.clone()))?;

        if current.tx.status != expected.status || current.tx.version != expected.version {
            return Err(EscrowError::ConflictingTransition {
                order_id: tx.order_id.clone(),
                expected_status: expected.status,
                expected_version: expected.version,
                actual_status: current.tx.status,
                actual_version: current.tx.version,
            });
        }
        if let Err(detail) = check_appended(current, &events, &tx) {
            tracing::warn!(
                order_id = %tx.order_id,
                detail = %detail,
                "rejected commit that does not extend the event log"
            );
            return Err(EscrowError::ConflictingTransition {
                order_id: tx.order_id.clone(),
                expected_status: expected.status,
                expected_version: expected.version,
                actual_status: current.tx.status,
                actual_version: current.tx.version,
            });
        }

        current.events.extend(events);
        current.tx = tx;
        Ok(())
    }

    fn list_due_for_release(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        let entries = self.entries.read();
        let flagged = self.flagged.read();
        let mut due: Vec<(DateTime<Utc>, OrderId)> = entries
            .values()
            .filter(|e| e.tx.is_due_for_release(now) && !flagged.contains_key(&e.tx.order_id))
            .filter_map(|e| e.tx.escrow_expires_at.map(|at| (at, e.tx.order_id.clone())))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    fn restore(&self, tx: EscrowTransaction, events: Vec<Event>) -> Result<(), EscrowError> {
        let verified = tx
            .verify_invariants()
            .and_then(|()| verify_event_chain(&tx.order_id, &events))
            .and_then(|()| {
                if tx.version == events.len() as u64 {
                    Ok(())
                } else {
                    Err(EscrowError::CorruptRecord {
                        order_id: tx.order_id.clone(),
                        detail: format!(
                            "version {} but {} events stored",
                            tx.version,
                            events.len()
                        ),
                    })
                }
            });
        if let Err(err) = verified {
            let detail = match &err {
                EscrowError::CorruptRecord { detail, .. } => detail.clone(),
                other => other.to_string(),
            };
            self.flag_for_reconciliation(&tx.order_id, detail);
            return Err(err);
        }
        self.entries
            .write()
            .insert(tx.order_id.clone(), Entry { tx, events });
        Ok(())
    }

    fn flag_for_reconciliation(&self, order_id: &OrderId, detail: String) {
        tracing::error!(
            order_id = %order_id,
            detail = %detail,
            "escrow record flagged for reconciliation"
        );
        self.entries.write().remove(order_id);
        self.flagged.write().insert(
            order_id.clone(),
            FlaggedRecord {
                order_id: order_id.clone(),
                detail,
                flagged_at: self.clock.now(),
            },
        );
    }

    fn flagged(&self) -> Vec<FlaggedRecord> {
        let mut records: Vec<_> = self.flagged.read().values().cloned().collect();
        records.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        records
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
