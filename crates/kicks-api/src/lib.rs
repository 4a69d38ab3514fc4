//! # kicks-api: HTTP Service for the Kicks Escrow Engine
//!
//! Exposes the escrow engine over JSON/HTTP, runs the background release
//! sweeper, and optionally writes through to Postgres.
//!
//! ## API Surface
//!
//! | Prefix                                  | Module                     | Domain |
//! |-----------------------------------------|----------------------------|--------|
//! | `/v1/escrow/transactions/*`             | [`routes::transactions`]   | Escrow lifecycle and projections |
//! | `/v1/escrow/transactions/*/disputes/*`  | [`routes::disputes`]       | Disputes |
//! | `/v1/escrow/statuses/*`, `/v1/escrow/dispute-reasons` | [`routes::reference`] | Reference data |
//! | `/v1/escrow/sweep`                      | [`routes::sweep`]          | Release sweep |
//!
//! ## Middleware Stack
//!
//! ```text
//! TraceLayer → DefaultBodyLimit → Handler (CallerIdentity extractor)
//! ```
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod sweeper;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes are mounted alongside the API; they need no caller identity.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::transactions::router())
        .merge(routes::disputes::router())
        .merge(routes::reference::router())
        .merge(routes::sweep::router())
        .merge(openapi::router())
        // Evidence is referenced, never uploaded, so bodies stay small.
        .layer(DefaultBodyLimit::max(256 * 1024));

    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new()
        .merge(health)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: the database, when configured, accepts a query. Records
/// held for reconciliation do not fail readiness but are counted in the body.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    let flagged = state.engine.store().flagged().len();
    if flagged > 0 {
        tracing::warn!(flagged, "escrow records awaiting reconciliation");
        return (
            StatusCode::OK,
            format!("ready; {flagged} escrow records awaiting reconciliation"),
        )
            .into_response();
    }

    (StatusCode::OK, "ready".to_string()).into_response()
}
