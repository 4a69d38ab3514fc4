//! # Release Scheduler
//!
//! Periodic sweep that releases escrow holds whose window has closed.
//!
//! The sweep scans with a cheap index query, then hands each candidate to
//! [`EscrowEngine::release_if_due`], which re-reads the record before
//! writing. A dispute committed between scan and write therefore wins: the
//! release either skips or loses the compare-and-swap. Lost races are retried
//! a bounded number of times, then left for the next sweep.
//!
//! Sweeping is idempotent. A released transaction is skipped and gains no
//! events.

use kicks_core::OrderId;
use serde::Serialize;

use crate::error::EscrowError;
use crate::machine::{EscrowEngine, ReleaseOutcome};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates returned by the scan.
    pub scanned: usize,
    /// Orders released by this sweep.
    pub released: Vec<OrderId>,
    /// Candidates that no longer qualified on re-read.
    pub skipped: usize,
    /// Compare-and-swap losses, including retried ones.
    pub conflicts: usize,
    /// Orders that failed for any other reason, or ran out of retries.
    pub failed: Vec<OrderId>,
}

/// Runs release sweeps against an engine.
#[derive(Debug, Clone)]
pub struct ReleaseScheduler {
    engine: EscrowEngine,
    max_retries: u32,
}

impl ReleaseScheduler {
    /// Scheduler with the retry budget from the engine's configuration.
    pub fn new(engine: EscrowEngine) -> Self {
        let max_retries = engine.config().scheduler.max_retries;
        Self {
            engine,
            max_retries,
        }
    }

    /// The engine being swept.
    pub fn engine(&self) -> &EscrowEngine {
        &self.engine
    }

    /// Release every transaction whose escrow window has closed.
    pub fn sweep_expired_escrows(&self) -> SweepReport {
        let now = self.engine.now();
        let due = self.engine.store().list_due_for_release(now);
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for order_id in due {
            self.release_one(order_id, &mut report);
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                released = report.released.len(),
                skipped = report.skipped,
                conflicts = report.conflicts,
                failed = report.failed.len(),
                "escrow release sweep finished"
            );
        } else {
            tracing::debug!("escrow release sweep found nothing due");
        }
        report
    }

    fn release_one(&self, order_id: OrderId, report: &mut SweepReport) {
        let mut attempt = 0;
        loop {
            match self.engine.release_if_due(&order_id) {
                Ok(ReleaseOutcome::Released(_)) => {
                    report.released.push(order_id);
                    return;
                }
                Ok(ReleaseOutcome::Skipped(reason)) => {
                    tracing::debug!(order_id = %order_id, reason = %reason, "release skipped");
                    report.skipped += 1;
                    return;
                }
                Err(EscrowError::ConflictingTransition { .. }) if attempt < self.max_retries => {
                    report.conflicts += 1;
                    attempt += 1;
                }
                Err(err @ EscrowError::ConflictingTransition { .. }) => {
                    report.conflicts += 1;
                    tracing::warn!(
                        order_id = %order_id,
                        attempts = attempt + 1,
                        error = %err,
                        "release gave up after repeated conflicts"
                    );
                    report.failed.push(order_id);
                    return;
                }
                Err(err) => {
                    tracing::error!(order_id = %order_id, error = %err, "release failed");
                    report.failed.push(order_id);
                    return;
                }
            }
        }
    }
}
