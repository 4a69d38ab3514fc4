//! # Background Release Sweeper
//!
//! A tokio task that runs the escrow release sweep on a fixed interval and
//! writes released transactions through to the database. The sweep itself
//! is synchronous and bounded by the number of due orders, so it runs on the
//! blocking pool.

use std::time::Duration;

use kicks_escrow::SweepReport;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::AppState;

/// Run one sweep and persist whatever it released.
///
/// Persist failures are logged; the in-memory release stands and the row is
/// rewritten on the order's next change or the next restart's reconciliation.
pub async fn run_sweep(state: &AppState) -> SweepReport {
    let scheduler = state.scheduler.clone();
    let report = match tokio::task::spawn_blocking(move || scheduler.sweep_expired_escrows()).await
    {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "release sweep task failed");
            return SweepReport::default();
        }
    };
    for order_id in &report.released {
        if let Err(e) = state.persist(order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "released order not persisted");
        }
    }
    report
}

/// Spawn the periodic sweeper.
pub fn spawn_release_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tracing::info!(interval_secs = every.as_secs(), "release sweeper started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_sweep(&state).await;
        }
    })
}
