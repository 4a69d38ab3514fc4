//! # Dispute API
//!
//! Buyers open disputes while an order is in transit or inside its escrow
//! window; arbiters resolve them. Resolution is the only way out of
//! `disputed`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use kicks_escrow::{DisputeSubmission, ResolutionOutcome};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, parse_order_id, Validate};
use crate::routes::transactions::{EvidenceBody, TransactionResponse};
use crate::state::AppState;

/// Buyer's dispute submission.
///
/// Field rules (reason from the catalog, description length, evidence count,
/// type and size) are checked together and every failure is reported.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OpenDisputeRequest {
    /// Reason code from `/v1/escrow/dispute-reasons`.
    pub reason: String,
    /// What went wrong, 20 characters or more.
    pub description: String,
    /// Up to five image references.
    #[serde(default)]
    pub evidence: Vec<EvidenceBody>,
}

impl From<OpenDisputeRequest> for DisputeSubmission {
    fn from(req: OpenDisputeRequest) -> Self {
        Self {
            reason: req.reason,
            description: req.description,
            evidence: req.evidence.into_iter().map(Into::into).collect(),
        }
    }
}

/// POST /v1/escrow/transactions/{order_id}/disputes: Open a dispute.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions/{order_id}/disputes",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    request_body = OpenDisputeRequest,
    responses(
        (status = 201, description = "Dispute opened; release is frozen", body = TransactionResponse),
        (status = 403, description = "Caller is not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Order is not disputable; reason explains why", body = crate::error::ErrorBody),
        (status = 422, description = "Submission invalid; details list each field", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
pub(crate) async fn open_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
    body: Result<Json<OpenDisputeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let order_id = parse_order_id(&order_id)?;
    let submission = DisputeSubmission::from(extract_json(body)?);
    let tx = state
        .engine
        .open_dispute(&order_id, &caller.actor, &submission)?;
    state.persist(&order_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::build(&tx, &state.engine, caller.role())),
    ))
}

/// Arbiter's decision.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResolveDisputeRequest {
    /// "released", "refunded" or "cancelled".
    pub outcome: String,
    /// Reasoning recorded with the resolution, at most 2000 characters.
    pub note: Option<String>,
}

impl Validate for ResolveDisputeRequest {
    fn validate(&self) -> Result<(), String> {
        parse_outcome(&self.outcome).map(|_| ())
    }
}

fn parse_outcome(raw: &str) -> Result<ResolutionOutcome, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).map_err(
        |_| format!("outcome must be one of released, refunded, cancelled; got \"{raw}\""),
    )
}

/// POST /v1/escrow/transactions/{order_id}/disputes/resolve: Resolve a dispute.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions/{order_id}/disputes/resolve",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    request_body = ResolveDisputeRequest,
    responses(
        (status = 200, description = "Dispute resolved", body = TransactionResponse),
        (status = 403, description = "Caller is not an arbiter", body = crate::error::ErrorBody),
        (status = 409, description = "No open dispute", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown outcome", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
pub(crate) async fn resolve_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
    body: Result<Json<ResolveDisputeRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;
    let req = extract_validated_json(body)?;
    let outcome = parse_outcome(&req.outcome).map_err(AppError::Validation)?;
    let tx = state
        .engine
        .resolve_dispute(&order_id, &caller.actor, outcome, req.note)?;
    state.persist(&order_id).await?;
    Ok(Json(TransactionResponse::build(
        &tx,
        &state.engine,
        caller.role(),
    )))
}

/// Build the dispute router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/escrow/transactions/{order_id}/disputes",
            post(open_dispute),
        )
        .route(
            "/v1/escrow/transactions/{order_id}/disputes/resolve",
            post(resolve_dispute),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_parsing_is_case_insensitive() {
        assert_eq!(parse_outcome("Refunded").unwrap(), ResolutionOutcome::Refunded);
        assert_eq!(parse_outcome(" released ").unwrap(), ResolutionOutcome::Released);
        assert!(parse_outcome("split").is_err());
    }

    #[test]
    fn evidence_passes_through_unchanged() {
        let submission = DisputeSubmission::from(OpenDisputeRequest {
            reason: "counterfeit".to_string(),
            description: "Tag font and stitching differ from retail.".to_string(),
            evidence: vec![EvidenceBody {
                reference: "ev/1.heic".to_string(),
                content_type: "image/heic".to_string(),
                size_bytes: 42,
            }],
        });
        assert_eq!(submission.evidence.len(), 1);
        assert_eq!(submission.evidence[0].content_type, "image/heic");
    }
}
