//! Reference data: the status graph and the dispute reason catalog.
//! Served without caller identity; nothing here is order-specific.

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use kicks_escrow::{dispute_catalog, valid_next_statuses, EscrowStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

/// Outgoing edges of one status.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusTransitionsResponse {
    pub status: String,
    pub terminal: bool,
    pub valid_next_statuses: Vec<String>,
}

/// One catalog reason.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisputeReasonView {
    pub code: String,
    pub label: String,
}

/// The versioned dispute reason catalog.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisputeCatalogResponse {
    pub version: u32,
    pub reasons: Vec<DisputeReasonView>,
}

/// GET /v1/escrow/statuses/{status}/next: Statuses reachable in one step.
#[utoipa::path(
    get,
    path = "/v1/escrow/statuses/{status}/next",
    params(("status" = String, Path, description = "Escrow status, e.g. \"shipped\"")),
    responses(
        (status = 200, description = "Outgoing edges", body = StatusTransitionsResponse),
        (status = 404, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "reference"
)]
pub(crate) async fn next_statuses(
    Path(status): Path<String>,
) -> Result<Json<StatusTransitionsResponse>, AppError> {
    let status: EscrowStatus = status
        .parse()
        .map_err(|e| AppError::NotFound(format!("{e}")))?;
    Ok(Json(StatusTransitionsResponse {
        status: status.as_str().to_string(),
        terminal: status.is_terminal(),
        valid_next_statuses: valid_next_statuses(status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    }))
}

/// GET /v1/escrow/dispute-reasons: Dispute reason catalog.
#[utoipa::path(
    get,
    path = "/v1/escrow/dispute-reasons",
    responses(
        (status = 200, description = "Catalog", body = DisputeCatalogResponse),
    ),
    tag = "reference"
)]
pub(crate) async fn dispute_reasons() -> Json<DisputeCatalogResponse> {
    let (version, entries) = dispute_catalog();
    Json(DisputeCatalogResponse {
        version,
        reasons: entries
            .into_iter()
            .map(|e| DisputeReasonView {
                code: e.code.to_string(),
                label: e.label.to_string(),
            })
            .collect(),
    })
}

/// Build the reference data router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrow/statuses/{status}/next", get(next_statuses))
        .route("/v1/escrow/dispute-reasons", get(dispute_reasons))
}
