//! # Escrow Clock
//!
//! Time source abstraction plus the read-side projections of the escrow
//! window: expiry, remaining time, progress and the countdown shown to buyers
//! and sellers. Nothing here mutates a transaction. Release itself is the
//! scheduler's job, so a countdown reading "Expired" never races a write.

use chrono::{DateTime, Days, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::transaction::EscrowTransaction;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. For tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// `delivered_at` plus `escrow_days` calendar days, or `None` on overflow.
pub fn escrow_expiry(delivered_at: DateTime<Utc>, escrow_days: u32) -> Option<DateTime<Utc>> {
    delivered_at.checked_add_days(Days::new(u64::from(escrow_days)))
}

/// Remaining time as `"2d 4h"`, `"3h 12m"`, `"45m"`, `"<1m"` or `"Expired"`.
pub fn time_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (expires_at - now).num_seconds();
    if secs <= 0 {
        return "Expired".to_string();
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "<1m".to_string()
    }
}

/// Fraction of the window elapsed, clamped to `[0, 1]`.
///
/// A zero-length window counts as fully elapsed.
pub fn escrow_progress(
    delivered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let window = (expires_at - delivered_at).num_milliseconds();
    if window <= 0 {
        return 1.0;
    }
    let elapsed = (now - delivered_at).num_milliseconds();
    (elapsed as f64 / window as f64).clamp(0.0, 1.0)
}

/// Countdown state for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscrowCountdown {
    pub expires_at: Option<DateTime<Utc>>,
    pub time_remaining: Option<String>,
    pub progress: f64,
    pub near_expiry: bool,
    pub expired: bool,
    /// A dispute is open; the countdown is held at the moment it was opened.
    pub frozen: bool,
    /// `escrow_days == 0`: funds release on delivery.
    pub trusted_seller: bool,
}

/// Project the countdown for `tx` at `now`.
///
/// Returns `None` until the item is delivered into an escrow window.
pub fn escrow_countdown(
    tx: &EscrowTransaction,
    now: DateTime<Utc>,
    near_expiry_threshold: f64,
) -> Option<EscrowCountdown> {
    let trusted_seller = tx.escrow_days == 0;
    let (delivered_at, expires_at) = match (tx.delivered_at, tx.escrow_expires_at) {
        (Some(d), Some(e)) => (d, e),
        _ if trusted_seller => {
            return Some(EscrowCountdown {
                expires_at: None,
                time_remaining: None,
                progress: if tx.delivered_at.is_some() { 1.0 } else { 0.0 },
                near_expiry: false,
                expired: false,
                frozen: false,
                trusted_seller,
            })
        }
        _ => return None,
    };

    let frozen_at = tx
        .dispute
        .as_ref()
        .filter(|_| tx.has_open_dispute())
        .map(|d| d.opened_at);
    let at = frozen_at.unwrap_or(now);
    let progress = escrow_progress(delivered_at, expires_at, at);
    let expired = frozen_at.is_none() && expires_at <= now;

    Some(EscrowCountdown {
        expires_at: Some(expires_at),
        time_remaining: Some(time_remaining(expires_at, at)),
        progress,
        near_expiry: !expired && frozen_at.is_none() && progress >= near_expiry_threshold,
        expired,
        frozen: frozen_at.is_some(),
        trusted_seller,
    })
}
