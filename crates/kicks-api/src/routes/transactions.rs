//! # Escrow Transaction API
//!
//! Lifecycle endpoints for one order's escrow hold, plus its read-side
//! projections (timeline, event log, settlement).
//!
//! Every write goes through [`EscrowEngine`](kicks_escrow::EscrowEngine),
//! which checks the caller's actor against the transaction before any
//! state changes, then is written through to the database when one is
//! configured.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use kicks_core::{Currency, FeeRate, Money, OrderId, UserId};
use kicks_escrow::{
    can_cancel_order, can_open_dispute, escrow_countdown, settled_total, verify_event_chain,
    ActorRole, Beneficiary, Dispute, EntryKind, EscrowEngine, EscrowTransaction, EvidenceRef,
    NewTransaction,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, parse_order_id, Validate};
use crate::state::AppState;

// ── Shared Views ────────────────────────────────────────────────

/// A money amount with its rendered form.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MoneyView {
    /// Amount in minor units (cents for USD).
    pub minor_units: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Display form, e.g. "$1,234.56".
    pub formatted: String,
}

impl From<Money> for MoneyView {
    fn from(m: Money) -> Self {
        Self {
            minor_units: m.minor_units(),
            currency: m.currency().code().to_string(),
            formatted: kicks_core::format_amount(&m),
        }
    }
}

/// Evidence reference, as submitted and as returned.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EvidenceBody {
    /// Opaque reference issued by the evidence storage service.
    pub reference: String,
    /// MIME type, e.g. "image/jpeg".
    pub content_type: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

impl From<EvidenceBody> for EvidenceRef {
    fn from(e: EvidenceBody) -> Self {
        Self {
            reference: e.reference,
            content_type: e.content_type,
            size_bytes: e.size_bytes,
        }
    }
}

impl From<&EvidenceRef> for EvidenceBody {
    fn from(e: &EvidenceRef) -> Self {
        Self {
            reference: e.reference.clone(),
            content_type: e.content_type.clone(),
            size_bytes: e.size_bytes,
        }
    }
}

/// Dispute attached to a transaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisputeView {
    pub reason: String,
    pub reason_label: String,
    pub description: String,
    pub evidence: Vec<EvidenceBody>,
    pub opened_at: DateTime<Utc>,
    pub opened_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    /// "released", "refunded" or "cancelled" once resolved.
    pub outcome: Option<String>,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<String>,
}

impl From<&Dispute> for DisputeView {
    fn from(d: &Dispute) -> Self {
        Self {
            reason: d.reason.code().to_string(),
            reason_label: d.reason.label().to_string(),
            description: d.description.clone(),
            evidence: d.evidence_refs.iter().map(EvidenceBody::from).collect(),
            opened_at: d.opened_at,
            opened_by: d.opened_by.to_string(),
            resolved_at: d.resolved_at,
            outcome: d
                .resolution
                .as_ref()
                .map(|r| r.outcome.target_status().as_str().to_string()),
            resolution_note: d.resolution.as_ref().and_then(|r| r.note.clone()),
            resolved_by: d.resolution.as_ref().map(|r| r.resolved_by.to_string()),
        }
    }
}

/// Escrow countdown for presentation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountdownView {
    pub expires_at: Option<DateTime<Utc>>,
    /// "2d 4h", "3h 12m", "45m", "<1m" or "Expired".
    pub time_remaining: Option<String>,
    /// Fraction of the window elapsed, 0.0 to 1.0.
    pub progress: f64,
    pub near_expiry: bool,
    pub expired: bool,
    /// A dispute is open and the countdown is held.
    pub frozen: bool,
    /// Funds release on delivery.
    pub trusted_seller: bool,
}

/// Whether an action is currently allowed, and why not.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EligibilityView {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Full view of an escrow transaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub order_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub item_amount: MoneyView,
    pub shipping_amount: MoneyView,
    pub total_amount: MoneyView,
    pub fee_rate_bps: u32,
    /// Rendered fee rate, e.g. "10%".
    pub fee_rate: String,
    pub platform_fee: MoneyView,
    pub seller_payout: MoneyView,
    pub status: String,
    pub terminal: bool,
    pub valid_next_statuses: Vec<String>,
    pub escrow_days: u32,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub escrow_expires_at: Option<DateTime<Utc>>,
    pub dispute: Option<DisputeView>,
    pub countdown: Option<CountdownView>,
    /// Whether the buyer may open a dispute now.
    pub can_dispute: EligibilityView,
    /// Whether the caller may cancel now.
    pub can_cancel: EligibilityView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl TransactionResponse {
    /// Build the view of `tx` for a caller with `role`.
    pub fn build(tx: &EscrowTransaction, engine: &EscrowEngine, role: ActorRole) -> Self {
        let dispute = can_open_dispute(tx);
        let cancel = can_cancel_order(tx, role);
        let countdown = escrow_countdown(tx, engine.now(), engine.config().near_expiry_threshold)
            .map(|c| CountdownView {
                expires_at: c.expires_at,
                time_remaining: c.time_remaining,
                progress: c.progress,
                near_expiry: c.near_expiry,
                expired: c.expired,
                frozen: c.frozen,
                trusted_seller: c.trusted_seller,
            });
        Self {
            order_id: tx.order_id.to_string(),
            buyer_id: tx.buyer_id.to_string(),
            seller_id: tx.seller_id.to_string(),
            item_amount: tx.item_amount.into(),
            shipping_amount: tx.shipping_amount.into(),
            total_amount: tx.total_amount.into(),
            fee_rate_bps: tx.fee_rate.basis_points(),
            fee_rate: tx.fee_rate.to_string(),
            platform_fee: tx.platform_fee.into(),
            seller_payout: tx.seller_payout.into(),
            status: tx.status.as_str().to_string(),
            terminal: tx.status.is_terminal(),
            valid_next_statuses: tx
                .status
                .valid_next_statuses()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            escrow_days: tx.escrow_days,
            tracking_number: tx.tracking_number.clone(),
            shipped_at: tx.shipped_at,
            delivered_at: tx.delivered_at,
            escrow_expires_at: tx.escrow_expires_at,
            dispute: tx.dispute.as_ref().map(DisputeView::from),
            countdown,
            can_dispute: EligibilityView {
                allowed: dispute.can_dispute,
                reason: dispute.reason,
            },
            can_cancel: EligibilityView {
                allowed: cancel.can_cancel,
                reason: cancel.reason,
            },
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            closed_at: tx.closed_at,
            version: tx.version,
        }
    }
}

/// Buyers and sellers see only their own orders; operational roles see all.
pub(crate) fn ensure_can_view(
    caller: &CallerIdentity,
    tx: &EscrowTransaction,
) -> Result<(), AppError> {
    let party = match caller.role() {
        ActorRole::Buyer => Some(&tx.buyer_id),
        ActorRole::Seller => Some(&tx.seller_id),
        ActorRole::Arbiter
        | ActorRole::PaymentProcessor
        | ActorRole::Scheduler
        | ActorRole::System => None,
    };
    match party {
        Some(id) if caller.actor.user_id() != Some(id) => Err(AppError::Forbidden(format!(
            "{} is not a party to order {}",
            caller.actor, tx.order_id
        ))),
        _ => Ok(()),
    }
}

/// Load a transaction the caller may see.
pub(crate) fn load_visible(
    state: &AppState,
    caller: &CallerIdentity,
    raw_order_id: &str,
) -> Result<(OrderId, EscrowTransaction), AppError> {
    let order_id = parse_order_id(raw_order_id)?;
    let tx = state.engine.get_transaction(&order_id)?;
    ensure_can_view(caller, &tx)?;
    Ok((order_id, tx))
}

// ── Create ──────────────────────────────────────────────────────

/// Payment captured: open an escrow hold.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTransactionRequest {
    pub order_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    /// ISO 4217 code; both amounts are in this currency.
    pub currency: String,
    /// Decimal string, e.g. "100.00".
    pub item_amount: String,
    /// Decimal string, e.g. "10.00".
    pub shipping_amount: String,
    /// Platform fee in basis points; the configured default applies when absent.
    pub fee_rate_bps: Option<u32>,
    /// Days after delivery before automatic release; 0 releases on delivery.
    pub escrow_days: Option<u32>,
    /// Capture reference from the payment processor.
    pub payment_reference: Option<String>,
}

impl Validate for CreateTransactionRequest {
    fn validate(&self) -> Result<(), String> {
        if self.item_amount.trim().is_empty() || self.shipping_amount.trim().is_empty() {
            return Err("item_amount and shipping_amount must be non-empty".into());
        }
        if self.currency.trim().is_empty() {
            return Err("currency must be non-empty".into());
        }
        if let Some(reference) = &self.payment_reference {
            if reference.len() > 256 {
                return Err("payment_reference must be at most 256 characters".into());
            }
        }
        Ok(())
    }
}

impl CreateTransactionRequest {
    fn into_new_transaction(self) -> Result<NewTransaction, AppError> {
        let currency: Currency = self.currency.parse()?;
        Ok(NewTransaction {
            order_id: OrderId::new(self.order_id)?,
            buyer_id: UserId::new(self.buyer_id)?,
            seller_id: UserId::new(self.seller_id)?,
            item_amount: Money::parse(&self.item_amount, currency)?,
            shipping_amount: Money::parse(&self.shipping_amount, currency)?,
            fee_rate: self.fee_rate_bps.map(FeeRate::from_basis_points).transpose()?,
            escrow_days: self.escrow_days,
            payment_reference: self.payment_reference,
        })
    }
}

/// POST /v1/escrow/transactions: Open an escrow hold for a captured payment.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions",
    request_body = CreateTransactionRequest,
    responses(
        (status = 201, description = "Escrow hold opened", body = TransactionResponse),
        (status = 403, description = "Caller is not the payment processor", body = crate::error::ErrorBody),
        (status = 409, description = "Order already has an escrow hold", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid amounts or identifiers", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn create_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let new = req.into_new_transaction()?;
    let tx = state.engine.create_transaction(new, &caller.actor)?;
    state.persist(&tx.order_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::build(&tx, &state.engine, caller.role())),
    ))
}

// ── Read ────────────────────────────────────────────────────────

/// GET /v1/escrow/transactions/{order_id}: Current state with countdown and eligibility.
#[utoipa::path(
    get,
    path = "/v1/escrow/transactions/{order_id}",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    responses(
        (status = 200, description = "Escrow transaction", body = TransactionResponse),
        (status = 403, description = "Caller is not a party to the order", body = crate::error::ErrorBody),
        (status = 404, description = "No escrow hold for this order", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn get_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let (_, tx) = load_visible(&state, &caller, &order_id)?;
    Ok(Json(TransactionResponse::build(
        &tx,
        &state.engine,
        caller.role(),
    )))
}

// ── Ship / Deliver / Cancel ─────────────────────────────────────

/// Seller hands the item to a carrier.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ShipRequest {
    /// Carrier tracking number, at most 64 characters.
    pub tracking_number: Option<String>,
}

/// POST /v1/escrow/transactions/{order_id}/ship: Seller marks the order shipped.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions/{order_id}/ship",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    request_body = ShipRequest,
    responses(
        (status = 200, description = "Order shipped", body = TransactionResponse),
        (status = 403, description = "Caller is not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Order cannot ship from its current status", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn mark_shipped(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
    body: Result<Json<ShipRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;
    let req = extract_json(body)?;
    let tx = state
        .engine
        .mark_shipped(&order_id, &caller.actor, req.tracking_number)?;
    state.persist(&order_id).await?;
    Ok(Json(TransactionResponse::build(
        &tx,
        &state.engine,
        caller.role(),
    )))
}

/// POST /v1/escrow/transactions/{order_id}/deliver: Buyer confirms delivery.
///
/// Starts the escrow window, or releases funds at once for a zero-day window.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions/{order_id}/deliver",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    responses(
        (status = 200, description = "Delivery confirmed", body = TransactionResponse),
        (status = 403, description = "Caller is not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Order is not in transit", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn confirm_delivery(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;
    let tx = state.engine.confirm_delivery(&order_id, &caller.actor)?;
    state.persist(&order_id).await?;
    Ok(Json(TransactionResponse::build(
        &tx,
        &state.engine,
        caller.role(),
    )))
}

/// Cancel an order and refund the buyer.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CancelRequest {
    /// Free-text note stored on the event, at most 2000 characters.
    pub note: Option<String>,
}

/// POST /v1/escrow/transactions/{order_id}/cancel: Cancel and refund.
#[utoipa::path(
    post,
    path = "/v1/escrow/transactions/{order_id}/cancel",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Order cancelled", body = TransactionResponse),
        (status = 403, description = "Caller is not a party to the order", body = crate::error::ErrorBody),
        (status = 409, description = "Cancellation refused; reason explains the alternative", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn cancel_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;
    let req = extract_json(body)?;
    let tx = state
        .engine
        .cancel_order(&order_id, &caller.actor, req.note)?;
    state.persist(&order_id).await?;
    Ok(Json(TransactionResponse::build(
        &tx,
        &state.engine,
        caller.role(),
    )))
}

// ── Projections ─────────────────────────────────────────────────

/// One timeline row.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimelineEntryView {
    pub event: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /v1/escrow/transactions/{order_id}/timeline: Human-facing order timeline.
#[utoipa::path(
    get,
    path = "/v1/escrow/transactions/{order_id}/timeline",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    responses(
        (status = 200, description = "Timeline in append order", body = Vec<TimelineEntryView>),
        (status = 404, description = "No escrow hold for this order", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn get_timeline(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<TimelineEntryView>>, AppError> {
    let (order_id, _) = load_visible(&state, &caller, &order_id)?;
    let entries = state
        .engine
        .timeline(&order_id)?
        .into_iter()
        .map(|e| TimelineEntryView {
            event: e.event.as_str().to_string(),
            description: e.description,
            timestamp: e.timestamp,
        })
        .collect();
    Ok(Json(entries))
}

/// One entry of the raw event log.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventView {
    pub event_id: Uuid,
    pub sequence: u64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub previous_hash: String,
    pub event_hash: String,
}

/// The event log with its integrity check.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventLogResponse {
    pub order_id: String,
    /// Whether the hash chain recomputes cleanly.
    pub chain_valid: bool,
    pub events: Vec<EventView>,
}

/// GET /v1/escrow/transactions/{order_id}/events: Hash-chained event log.
#[utoipa::path(
    get,
    path = "/v1/escrow/transactions/{order_id}/events",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    responses(
        (status = 200, description = "Event log", body = EventLogResponse),
        (status = 404, description = "No escrow hold for this order", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn get_events(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Json<EventLogResponse>, AppError> {
    let (order_id, _) = load_visible(&state, &caller, &order_id)?;
    let events = state.engine.events(&order_id)?;
    let chain_valid = match verify_event_chain(&order_id, &events) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "event chain failed verification");
            false
        }
    };
    Ok(Json(EventLogResponse {
        order_id: order_id.to_string(),
        chain_valid,
        events: events
            .into_iter()
            .map(|e| EventView {
                event_id: e.event_id,
                sequence: e.sequence,
                event_type: e.event_type.as_str().to_string(),
                timestamp: e.timestamp,
                actor: e.actor.to_string(),
                payload: e.payload,
                previous_hash: e.previous_hash,
                event_hash: e.event_hash,
            })
            .collect(),
    }))
}

/// One money movement owed by a closed transaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettlementEntryView {
    /// "seller_payout", "platform_fee" or "buyer_refund".
    pub kind: String,
    /// "seller", "buyer" or "platform".
    pub beneficiary: String,
    pub beneficiary_id: Option<String>,
    pub amount: MoneyView,
}

/// Ledger instructions for a transaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettlementResponse {
    pub order_id: String,
    pub status: String,
    /// False until the transaction reaches a terminal status.
    pub settled: bool,
    pub entries: Vec<SettlementEntryView>,
    pub total: Option<MoneyView>,
}

/// GET /v1/escrow/transactions/{order_id}/settlement: Ledger entries.
#[utoipa::path(
    get,
    path = "/v1/escrow/transactions/{order_id}/settlement",
    params(("order_id" = String, Path, description = "Marketplace order ID")),
    responses(
        (status = 200, description = "Settlement entries", body = SettlementResponse),
        (status = 404, description = "No escrow hold for this order", body = crate::error::ErrorBody),
    ),
    tag = "escrow"
)]
pub(crate) async fn get_settlement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Json<SettlementResponse>, AppError> {
    let (order_id, tx) = load_visible(&state, &caller, &order_id)?;
    let entries = state
        .engine
        .settlement(&order_id)?
        .into_iter()
        .map(|e| {
            let (beneficiary, beneficiary_id) = match e.beneficiary {
                Beneficiary::Seller(id) => ("seller", Some(id.to_string())),
                Beneficiary::Buyer(id) => ("buyer", Some(id.to_string())),
                Beneficiary::Platform => ("platform", None),
            };
            SettlementEntryView {
                kind: match e.kind {
                    EntryKind::SellerPayout => "seller_payout",
                    EntryKind::PlatformFee => "platform_fee",
                    EntryKind::BuyerRefund => "buyer_refund",
                }
                .to_string(),
                beneficiary: beneficiary.to_string(),
                beneficiary_id,
                amount: e.amount.into(),
            }
        })
        .collect();
    Ok(Json(SettlementResponse {
        order_id: order_id.to_string(),
        status: tx.status.as_str().to_string(),
        settled: tx.status.is_terminal(),
        entries,
        total: settled_total(&tx).map(MoneyView::from),
    }))
}

// ── Router ──────────────────────────────────────────────────────

/// Build the escrow transaction router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrow/transactions", post(create_transaction))
        .route("/v1/escrow/transactions/{order_id}", get(get_transaction))
        .route("/v1/escrow/transactions/{order_id}/ship", post(mark_shipped))
        .route(
            "/v1/escrow/transactions/{order_id}/deliver",
            post(confirm_delivery),
        )
        .route("/v1/escrow/transactions/{order_id}/cancel", post(cancel_order))
        .route(
            "/v1/escrow/transactions/{order_id}/timeline",
            get(get_timeline),
        )
        .route("/v1/escrow/transactions/{order_id}/events", get(get_events))
        .route(
            "/v1/escrow/transactions/{order_id}/settlement",
            get(get_settlement),
        )
}
