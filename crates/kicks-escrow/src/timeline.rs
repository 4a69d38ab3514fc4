//! Human-facing timeline projected from the event log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dispute::DisputeReason;
use crate::event::{Event, EventType};

/// One row of the order timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub event: EventType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Project `events` into timeline rows in append order.
///
/// Only events that happened appear; there are no placeholder rows for steps
/// still ahead.
pub fn build_escrow_timeline(events: &[Event]) -> Vec<TimelineEntry> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|e| e.sequence);
    ordered
        .into_iter()
        .map(|e| TimelineEntry {
            event: e.event_type,
            description: describe(e),
            timestamp: e.timestamp,
        })
        .collect()
}

fn payload_str<'a>(event: &'a Event, key: &str) -> Option<&'a str> {
    event.payload.get(key).and_then(|v| v.as_str())
}

fn describe(event: &Event) -> String {
    match event.event_type {
        EventType::Created => "Order placed".to_string(),
        EventType::Paid => "Payment received and held in escrow".to_string(),
        EventType::Shipped => match payload_str(event, "tracking_number") {
            Some(tracking) => format!("Seller shipped the order (tracking {tracking})"),
            None => "Seller shipped the order".to_string(),
        },
        EventType::Delivered => "Buyer confirmed delivery".to_string(),
        EventType::EscrowStarted => match payload_str(event, "escrow_expires_at") {
            Some(at) => format!("Escrow window started; funds release after {at}"),
            None => "Escrow window started".to_string(),
        },
        EventType::Disputed => {
            let label = payload_str(event, "reason")
                .and_then(|r| r.parse::<DisputeReason>().ok())
                .map(|r| r.label());
            match label {
                Some(label) => format!("Buyer opened a dispute: {label}"),
                None => "Buyer opened a dispute".to_string(),
            }
        }
        EventType::Released => "Funds released to the seller".to_string(),
        EventType::Refunded => "Payment refunded to the buyer".to_string(),
        EventType::Cancelled => "Order cancelled and payment refunded".to_string(),
    }
}
