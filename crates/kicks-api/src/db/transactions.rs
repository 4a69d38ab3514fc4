//! Escrow transaction persistence.
//!
//! All functions take a `&PgPool`. Status edges and amount invariants are
//! enforced by the engine, not in SQL; the row is a write-through copy of
//! the in-memory record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use kicks_core::OrderId;
use kicks_escrow::{Actor, EscrowTransaction, Event, EventType};
use sqlx::PgPool;
use uuid::Uuid;

/// A loaded record, or the order id and reason it could not be decoded.
pub type LoadedRecord = Result<(EscrowTransaction, Vec<Event>), (OrderId, String)>;

fn to_i64(field: &str, value: u64) -> Result<i64, sqlx::Error> {
    i64::try_from(value)
        .map_err(|_| sqlx::Error::Protocol(format!("{field} {value} does not fit in BIGINT")))
}

/// Upsert the transaction row and append any events not yet stored.
///
/// Both writes happen in one database transaction. A row is never replaced
/// by an older version.
pub async fn save(
    pool: &PgPool,
    tx: &EscrowTransaction,
    events: &[Event],
) -> Result<(), sqlx::Error> {
    let record = serde_json::to_value(tx)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize escrow record: {e}")))?;

    let mut db = pool.begin().await?;

    sqlx::query(
        "INSERT INTO escrow_transactions
            (order_id, buyer_id, seller_id, status, currency, total_minor_units, version,
             escrow_expires_at, record, created_at, updated_at, closed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (order_id) DO UPDATE SET
            status = EXCLUDED.status,
            version = EXCLUDED.version,
            escrow_expires_at = EXCLUDED.escrow_expires_at,
            record = EXCLUDED.record,
            updated_at = EXCLUDED.updated_at,
            closed_at = EXCLUDED.closed_at
         WHERE escrow_transactions.version < EXCLUDED.version",
    )
    .bind(tx.order_id.as_str())
    .bind(tx.buyer_id.as_str())
    .bind(tx.seller_id.as_str())
    .bind(tx.status.as_str())
    .bind(tx.total_amount.currency().code())
    .bind(tx.total_amount.minor_units())
    .bind(to_i64("version", tx.version)?)
    .bind(tx.escrow_expires_at)
    .bind(&record)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .bind(tx.closed_at)
    .execute(&mut *db)
    .await?;

    for event in events {
        let actor = serde_json::to_value(&event.actor)
            .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize actor: {e}")))?;
        sqlx::query(
            "INSERT INTO escrow_events
                (order_id, sequence, event_id, event_type, occurred_at, actor, payload,
                 previous_hash, event_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (order_id, sequence) DO NOTHING",
        )
        .bind(event.order_id.as_str())
        .bind(to_i64("sequence", event.sequence)?)
        .bind(event.event_id)
        .bind(event.event_type.as_str())
        .bind(event.timestamp)
        .bind(&actor)
        .bind(&event.payload)
        .bind(&event.previous_hash)
        .bind(&event.event_hash)
        .execute(&mut *db)
        .await?;
    }

    db.commit().await?;
    Ok(())
}

/// Load every transaction with its event log.
///
/// Rows that cannot be decoded come back as `Err` so the caller can flag
/// them; rows whose order id itself is unreadable are logged and dropped.
pub async fn load_all(pool: &PgPool) -> Result<Vec<LoadedRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT order_id, record FROM escrow_transactions ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    let event_rows = sqlx::query_as::<_, EventRow>(
        "SELECT order_id, sequence, event_id, event_type, occurred_at, actor, payload,
                previous_hash, event_hash
         FROM escrow_events ORDER BY order_id, sequence",
    )
    .fetch_all(pool)
    .await?;

    let mut logs: HashMap<String, Vec<EventRow>> = HashMap::new();
    for row in event_rows {
        logs.entry(row.order_id.clone()).or_default().push(row);
    }

    let mut loaded = Vec::with_capacity(rows.len());
    for row in rows {
        let order_id = match OrderId::new(row.order_id.clone()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    order_id = %row.order_id,
                    error = %e,
                    "unreadable order id in database, skipping"
                );
                continue;
            }
        };
        let events = logs.remove(&row.order_id).unwrap_or_default();
        loaded.push(decode(order_id, row.record, events));
    }
    Ok(loaded)
}

fn decode(order_id: OrderId, record: serde_json::Value, rows: Vec<EventRow>) -> LoadedRecord {
    let tx: EscrowTransaction = match serde_json::from_value(record) {
        Ok(tx) => tx,
        Err(e) => return Err((order_id, format!("undecodable record: {e}"))),
    };
    if tx.order_id != order_id {
        return Err((
            order_id,
            format!("record carries order id {}", tx.order_id),
        ));
    }
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        match row.into_event(&order_id) {
            Ok(event) => events.push(event),
            Err(detail) => return Err((order_id, detail)),
        }
    }
    Ok((tx, events))
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct TransactionRow {
    order_id: String,
    record: serde_json::Value,
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct EventRow {
    order_id: String,
    sequence: i64,
    event_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    actor: serde_json::Value,
    payload: serde_json::Value,
    previous_hash: String,
    event_hash: String,
}

impl EventRow {
    fn into_event(self, order_id: &OrderId) -> Result<Event, String> {
        let sequence = u64::try_from(self.sequence)
            .map_err(|_| format!("negative event sequence {}", self.sequence))?;
        let event_type: EventType = self.event_type.parse()?;
        let actor: Actor = serde_json::from_value(self.actor)
            .map_err(|e| format!("undecodable actor on event {sequence}: {e}"))?;
        Ok(Event {
            event_id: self.event_id,
            order_id: order_id.clone(),
            sequence,
            event_type,
            timestamp: self.occurred_at,
            actor,
            payload: self.payload,
            previous_hash: self.previous_hash,
            event_hash: self.event_hash,
        })
    }
}
