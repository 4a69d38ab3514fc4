//! Scheduler hook: trigger a release sweep on demand.
//!
//! The background sweeper calls the same code on its interval. An external
//! cron can use this endpoint instead when the sweeper is disabled.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use kicks_escrow::ActorRole;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{require_role, CallerIdentity};
use crate::error::AppError;
use crate::state::AppState;
use crate::sweeper::run_sweep;

/// Outcome of one sweep.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub scanned: usize,
    pub released: Vec<String>,
    pub skipped: usize,
    pub conflicts: usize,
    pub failed: Vec<String>,
}

/// POST /v1/escrow/sweep: Release every escrow hold whose window has closed.
#[utoipa::path(
    post,
    path = "/v1/escrow/sweep",
    responses(
        (status = 200, description = "Sweep report", body = SweepResponse),
        (status = 403, description = "Caller is not the scheduler", body = crate::error::ErrorBody),
    ),
    tag = "scheduler"
)]
pub(crate) async fn sweep(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<SweepResponse>, AppError> {
    require_role(&caller, ActorRole::Scheduler)?;
    let report = run_sweep(&state).await;
    Ok(Json(SweepResponse {
        scanned: report.scanned,
        released: report.released.iter().map(ToString::to_string).collect(),
        skipped: report.skipped,
        conflicts: report.conflicts,
        failed: report.failed.iter().map(ToString::to_string).collect(),
    }))
}

/// Build the scheduler router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/escrow/sweep", post(sweep))
}
