//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec served
//! at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Documents the gateway-set identity headers.
struct IdentityHeaders;

impl Modify for IdentityHeaders {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "actor_role",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    crate::auth::ROLE_HEADER,
                    "Caller role, set by the identity gateway.",
                ))),
            );
            components.add_security_scheme(
                "actor_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    crate::auth::ID_HEADER,
                    "Caller user id; required for buyer, seller and arbiter.",
                ))),
            );
        }
    }
}

/// Assembled OpenAPI spec for the escrow API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kicks Escrow API",
        version = "0.1.0",
        description = "Escrow transaction engine for the Kicks sneaker marketplace.\n\nHolds buyer funds from payment capture until the escrow window after delivery closes, then releases them to the seller. Buyers may dispute while the order is in transit or inside the window; arbiters resolve disputes.\n\nCaller identity is taken from the `x-actor-role` and `x-actor-id` headers set by the upstream identity gateway. Health probes (`/health/*`) need no identity.",
        license(name = "AGPL-3.0-or-later")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("actor_role" = [], "actor_id" = [])
    ),
    paths(
        // ── Escrow transactions ─────────────────────────────────────────
        crate::routes::transactions::create_transaction,
        crate::routes::transactions::get_transaction,
        crate::routes::transactions::mark_shipped,
        crate::routes::transactions::confirm_delivery,
        crate::routes::transactions::cancel_order,
        crate::routes::transactions::get_timeline,
        crate::routes::transactions::get_events,
        crate::routes::transactions::get_settlement,
        // ── Disputes ────────────────────────────────────────────────────
        crate::routes::disputes::open_dispute,
        crate::routes::disputes::resolve_dispute,
        // ── Reference data ──────────────────────────────────────────────
        crate::routes::reference::next_statuses,
        crate::routes::reference::dispute_reasons,
        // ── Scheduler ───────────────────────────────────────────────────
        crate::routes::sweep::sweep,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::transactions::MoneyView,
            crate::routes::transactions::EvidenceBody,
            crate::routes::transactions::DisputeView,
            crate::routes::transactions::CountdownView,
            crate::routes::transactions::EligibilityView,
            crate::routes::transactions::TransactionResponse,
            crate::routes::transactions::CreateTransactionRequest,
            crate::routes::transactions::ShipRequest,
            crate::routes::transactions::CancelRequest,
            crate::routes::transactions::TimelineEntryView,
            crate::routes::transactions::EventView,
            crate::routes::transactions::EventLogResponse,
            crate::routes::transactions::SettlementEntryView,
            crate::routes::transactions::SettlementResponse,
            crate::routes::disputes::OpenDisputeRequest,
            crate::routes::disputes::ResolveDisputeRequest,
            crate::routes::reference::StatusTransitionsResponse,
            crate::routes::reference::DisputeReasonView,
            crate::routes::reference::DisputeCatalogResponse,
            crate::routes::sweep::SweepResponse,
        ),
    ),
    modifiers(&IdentityHeaders),
    tags(
        (name = "escrow", description = "Escrow hold lifecycle: create, ship, deliver, cancel, and read-side projections"),
        (name = "disputes", description = "Buyer disputes and arbiter resolution"),
        (name = "reference", description = "Status graph and dispute reason catalog"),
        (name = "scheduler", description = "Auto-release sweep"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
