//! # Integration Tests for kicks-api
//!
//! Drives the router with `oneshot` requests: health probes, caller
//! identity, the full escrow lifecycle, disputes, cancellation policy,
//! projections, the sweep hook and OpenAPI generation.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use kicks_api::state::{AppConfig, AppState};
use kicks_escrow::{EngineConfig, EscrowEngine, InMemoryStore, ManualClock};

/// Helper: in-memory app on the system clock.
fn test_app() -> axum::Router {
    kicks_api::app(AppState::new())
}

/// Helper: app plus a handle on its clock.
fn test_app_with_clock() -> (axum::Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let engine = EscrowEngine::new(
        Arc::new(InMemoryStore::new()),
        clock.clone(),
        EngineConfig::default(),
    );
    let config = AppConfig {
        port: 8080,
        sweep_enabled: false,
    };
    let state = AppState::with_engine(engine, config, None);
    (kicks_api::app(state), clock)
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Helper: read response body as JSON.
async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Helper: attach identity headers. `id` is skipped for service roles.
fn as_actor(
    builder: axum::http::request::Builder,
    role: &str,
    id: Option<&str>,
) -> axum::http::request::Builder {
    let builder = builder.header("x-actor-role", role);
    match id {
        Some(id) => builder.header("x-actor-id", id),
        None => builder,
    }
}

fn get(uri: &str, role: &str, id: Option<&str>) -> Request<Body> {
    as_actor(Request::builder().uri(uri), role, id)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, role: &str, id: Option<&str>, body: Value) -> Request<Body> {
    as_actor(Request::builder().method("POST").uri(uri), role, id)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_empty(uri: &str, role: &str, id: Option<&str>) -> Request<Body> {
    as_actor(Request::builder().method("POST").uri(uri), role, id)
        .body(Body::empty())
        .unwrap()
}

fn create_body(order_id: &str, escrow_days: Option<u32>) -> Value {
    json!({
        "order_id": order_id,
        "buyer_id": "buyer-ann",
        "seller_id": "seller-bo",
        "currency": "USD",
        "item_amount": "200.00",
        "shipping_amount": "15.00",
        "escrow_days": escrow_days,
        "payment_reference": "pi_3Nx",
    })
}

fn dispute_body() -> Value {
    json!({
        "reason": "not_as_described",
        "description": "Left shoe has a torn heel tab and the box is a replica.",
        "evidence": [
            {
                "reference": "s3://evidence/heel.jpg",
                "content_type": "image/jpeg",
                "size_bytes": 120000,
            }
        ],
    })
}

/// Create, then ship, an order.
async fn shipped_order(app: &axum::Router, order_id: &str) {
    let response = app
        .clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body(order_id, None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/escrow/transactions/{order_id}/ship"),
            "seller",
            Some("seller-bo"),
            json!({"tracking_number": "1Z999AA10123456784"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_readiness_reports_records_held_for_reconciliation() {
    let state = AppState::new();
    state.engine.store().flag_for_reconciliation(
        &kicks_core::OrderId::new("ord-held").unwrap(),
        "total_amount does not equal item_amount + shipping_amount".to_string(),
    );
    let app = kicks_api::app(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        "ready; 1 escrow records awaiting reconciliation"
    );
}

// -- Caller Identity ----------------------------------------------------------

#[tokio::test]
async fn test_missing_role_header_is_401() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/escrow/transactions/ord-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_system_role_cannot_be_asserted() {
    let app = test_app();
    let response = app
        .oneshot(post_empty("/v1/escrow/sweep", "system", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_buyer_without_id_is_401() {
    let app = test_app();
    let response = app
        .oneshot(get("/v1/escrow/transactions/ord-1", "buyer", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// -- Transactions -------------------------------------------------------------

#[tokio::test]
async fn test_create_transaction_returns_fee_split() {
    let app = test_app();
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-100", None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "payment_held");
    assert_eq!(body["version"], 2);
    assert_eq!(body["total_amount"]["minor_units"], 21_500);
    assert_eq!(body["platform_fee"]["minor_units"], 2_000);
    assert_eq!(body["seller_payout"]["minor_units"], 19_500);
    assert_eq!(body["seller_payout"]["formatted"], "$195.00");
    assert_eq!(body["escrow_days"], 3);
}

#[tokio::test]
async fn test_only_payment_processor_creates() {
    let app = test_app();
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions",
            "buyer",
            Some("buyer-ann"),
            create_body("ord-101", None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_duplicate_create_is_409() {
    let app = test_app();
    let first = app
        .clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-102", None),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-102", None),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_negative_amount_is_422() {
    let app = test_app();
    let mut body = create_body("ord-103", None);
    body["item_amount"] = json!("-1.00");
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_AMOUNT");
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let app = test_app();
    let response = app
        .oneshot(get("/v1/escrow/transactions/ord-missing", "arbiter", Some("arb-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stranger_cannot_read_order() {
    let app = test_app();
    shipped_order(&app, "ord-104").await;
    let response = app
        .oneshot(get("/v1/escrow/transactions/ord-104", "buyer", Some("buyer-zed")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_wrong_seller_cannot_ship() {
    let app = test_app();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-105", None),
        ))
        .await
        .unwrap();
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-105/ship",
            "seller",
            Some("seller-other"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deliver_before_ship_is_invalid_transition() {
    let app = test_app();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-106", None),
        ))
        .await
        .unwrap();
    let response = app
        .oneshot(post_empty(
            "/v1/escrow/transactions/ord-106/deliver",
            "buyer",
            Some("buyer-ann"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_delivery_starts_countdown() {
    let (app, clock) = test_app_with_clock();
    shipped_order(&app, "ord-107").await;

    let response = app
        .clone()
        .oneshot(post_empty(
            "/v1/escrow/transactions/ord-107/deliver",
            "buyer",
            Some("buyer-ann"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["escrow_expires_at"], "2025-03-04T09:00:00Z");
    assert_eq!(body["can_dispute"]["allowed"], true);

    clock.advance(Duration::hours(36));
    let response = app
        .oneshot(get("/v1/escrow/transactions/ord-107", "buyer", Some("buyer-ann")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["countdown"]["time_remaining"], "1d 12h");
    assert_eq!(body["countdown"]["expired"], false);
    assert_eq!(body["countdown"]["progress"], 0.5);
}

#[tokio::test]
async fn test_zero_day_window_releases_on_delivery() {
    let app = test_app();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-108", Some(0)),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-108/ship",
            "seller",
            Some("seller-bo"),
            json!({}),
        ))
        .await
        .unwrap();
    let response = app
        .oneshot(post_empty(
            "/v1/escrow/transactions/ord-108/deliver",
            "buyer",
            Some("buyer-ann"),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "released");
    assert_eq!(body["terminal"], true);
}

// -- Cancellation -------------------------------------------------------------

#[tokio::test]
async fn test_buyer_cancels_before_shipping() {
    let app = test_app();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-200", None),
        ))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-200/cancel",
            "buyer",
            Some("buyer-ann"),
            json!({"note": "ordered the wrong size"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");

    let response = app
        .oneshot(get(
            "/v1/escrow/transactions/ord-200/settlement",
            "buyer",
            Some("buyer-ann"),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["settled"], true);
    assert_eq!(body["entries"][0]["kind"], "buyer_refund");
    assert_eq!(body["entries"][0]["amount"]["minor_units"], 21_500);
}

#[tokio::test]
async fn test_buyer_cannot_cancel_after_shipping() {
    let app = test_app();
    shipped_order(&app, "ord-201").await;
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-201/cancel",
            "buyer",
            Some("buyer-ann"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_CANCELLABLE");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("open a dispute"));
}

#[tokio::test]
async fn test_arbiter_cancels_shipped_order() {
    let app = test_app();
    shipped_order(&app, "ord-202").await;
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-202/cancel",
            "arbiter",
            Some("arb-1"),
            json!({"note": "carrier lost the parcel"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");
}

// -- Disputes -----------------------------------------------------------------

#[tokio::test]
async fn test_dispute_then_refund() {
    let app = test_app();
    shipped_order(&app, "ord-300").await;

    let response = app
        .clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-300/disputes",
            "buyer",
            Some("buyer-ann"),
            dispute_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "disputed");
    assert_eq!(body["dispute"]["reason"], "not_as_described");
    assert!(body["dispute"]["resolved_at"].is_null());

    let response = app
        .clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-300/disputes/resolve",
            "arbiter",
            Some("arb-1"),
            json!({"outcome": "refunded", "note": "replica confirmed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "refunded");
    assert_eq!(body["dispute"]["outcome"], "refunded");
    assert_eq!(body["dispute"]["resolved_by"], "arbiter:arb-1");

    let response = app
        .oneshot(get(
            "/v1/escrow/transactions/ord-300/events",
            "arbiter",
            Some("arb-1"),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["chain_valid"], true);
    let types: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, ["created", "paid", "shipped", "disputed", "refunded"]);
}

#[tokio::test]
async fn test_dispute_before_shipping_is_refused() {
    let app = test_app();
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions",
            "payment_processor",
            None,
            create_body("ord-301", None),
        ))
        .await
        .unwrap();
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-301/disputes",
            "buyer",
            Some("buyer-ann"),
            dispute_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_DISPUTABLE");
}

#[tokio::test]
async fn test_invalid_dispute_lists_every_field() {
    let app = test_app();
    shipped_order(&app, "ord-302").await;
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-302/disputes",
            "buyer",
            Some("buyer-ann"),
            json!({
                "reason": "changed_my_mind",
                "description": "too short",
                "evidence": [
                    {
                        "reference": "s3://evidence/a.pdf",
                        "content_type": "application/pdf",
                        "size_bytes": 10,
                    }
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = body["error"]["details"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"reason"));
    assert!(fields.contains(&"description"));
    assert!(fields.iter().any(|f| f.starts_with("evidence[0]")));
}

#[tokio::test]
async fn test_seller_cannot_open_dispute() {
    let app = test_app();
    shipped_order(&app, "ord-303").await;
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-303/disputes",
            "seller",
            Some("seller-bo"),
            dispute_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_outcome_is_422() {
    let app = test_app();
    shipped_order(&app, "ord-304").await;
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-304/disputes",
            "buyer",
            Some("buyer-ann"),
            dispute_body(),
        ))
        .await
        .unwrap();
    let response = app
        .oneshot(post(
            "/v1/escrow/transactions/ord-304/disputes/resolve",
            "arbiter",
            Some("arb-1"),
            json!({"outcome": "split"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Sweep --------------------------------------------------------------------

#[tokio::test]
async fn test_sweep_releases_expired_and_skips_disputed() {
    let (app, clock) = test_app_with_clock();
    for order in ["ord-400", "ord-401"] {
        shipped_order(&app, order).await;
        let response = app
            .clone()
            .oneshot(post_empty(
                &format!("/v1/escrow/transactions/{order}/deliver"),
                "buyer",
                Some("buyer-ann"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    app.clone()
        .oneshot(post(
            "/v1/escrow/transactions/ord-401/disputes",
            "buyer",
            Some("buyer-ann"),
            dispute_body(),
        ))
        .await
        .unwrap();

    clock.advance(Duration::days(3) + Duration::minutes(1));
    let response = app
        .clone()
        .oneshot(post_empty("/v1/escrow/sweep", "scheduler", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["released"], json!(["ord-400"]));
    assert_eq!(body["failed"], json!([]));

    let response = app
        .clone()
        .oneshot(get(
            "/v1/escrow/transactions/ord-400/settlement",
            "seller",
            Some("seller-bo"),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "released");
    let payout = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["kind"] == "seller_payout")
        .unwrap()
        .clone();
    assert_eq!(payout["amount"]["minor_units"], 19_500);

    // Second sweep finds nothing new.
    let response = app
        .oneshot(post_empty("/v1/escrow/sweep", "scheduler", None))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["released"], json!([]));
}

#[tokio::test]
async fn test_sweep_requires_scheduler_role() {
    let app = test_app();
    let response = app
        .oneshot(post_empty("/v1/escrow/sweep", "arbiter", Some("arb-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// -- Projections --------------------------------------------------------------

#[tokio::test]
async fn test_timeline_follows_event_order() {
    let app = test_app();
    shipped_order(&app, "ord-500").await;
    let response = app
        .oneshot(get(
            "/v1/escrow/transactions/ord-500/timeline",
            "seller",
            Some("seller-bo"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .windows(2)
        .all(|w| w[0]["timestamp"].as_str() <= w[1]["timestamp"].as_str()));
}

// -- Reference Data -----------------------------------------------------------

#[tokio::test]
async fn test_next_statuses_from_shipped() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/escrow/statuses/shipped/next")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["valid_next_statuses"],
        json!(["delivered", "disputed", "cancelled"])
    );
    assert_eq!(body["terminal"], false);
}

#[tokio::test]
async fn test_unknown_status_is_404() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/escrow/statuses/lost/next")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dispute_reason_catalog() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/escrow/dispute-reasons")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["version"].as_u64().unwrap() >= 1);
    assert!(body["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["code"] == "not_as_described"));
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_spec_served() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/v1/escrow/sweep"].is_object());
    assert!(body["components"]["securitySchemes"]["actor_role"].is_object());
}
