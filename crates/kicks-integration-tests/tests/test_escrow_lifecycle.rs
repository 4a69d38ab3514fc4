//! Escrow lifecycle across the engine, scheduler, timeline and ledger.
//!
//! Each test walks one order from payment capture to a terminal status and
//! checks the record, the hash-chained event log and the settlement entries
//! agree with each other at the end.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use kicks_core::{Currency, FeeRate, Money, OrderId, UserId};
use kicks_escrow::{
    settled_total, verify_event_chain, Actor, DisputeSubmission, EngineConfig, EntryKind,
    EscrowEngine, EscrowStatus, EventType, EvidenceRef, InMemoryStore, ManualClock,
    NewTransaction, ReleaseScheduler, ResolutionOutcome,
};

struct World {
    engine: EscrowEngine,
    scheduler: ReleaseScheduler,
    clock: Arc<ManualClock>,
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap(),
    ));
    let engine = EscrowEngine::new(
        Arc::new(InMemoryStore::new()),
        clock.clone(),
        EngineConfig::default(),
    );
    let scheduler = ReleaseScheduler::new(engine.clone());
    World {
        engine,
        scheduler,
        clock,
    }
}

fn buyer() -> Actor {
    Actor::Buyer(UserId::new("buyer-kim").unwrap())
}

fn seller() -> Actor {
    Actor::Seller(UserId::new("seller-lee").unwrap())
}

fn arbiter() -> Actor {
    Actor::Arbiter(UserId::new("arb-7").unwrap())
}

fn order(id: &str, escrow_days: Option<u32>) -> NewTransaction {
    NewTransaction {
        order_id: OrderId::new(id).unwrap(),
        buyer_id: UserId::new("buyer-kim").unwrap(),
        seller_id: UserId::new("seller-lee").unwrap(),
        item_amount: Money::parse("320.00", Currency::Usd).unwrap(),
        shipping_amount: Money::parse("14.50", Currency::Usd).unwrap(),
        fee_rate: None,
        escrow_days,
        payment_reference: Some("pi_life".to_string()),
    }
}

fn submission() -> DisputeSubmission {
    DisputeSubmission {
        reason: "counterfeit".to_string(),
        description: "Stitching on the swoosh is uneven and the SKU label is wrong.".to_string(),
        evidence: vec![EvidenceRef {
            reference: "evidence/swoosh.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 450_000,
        }],
    }
}

/// Record, event log and ledger agree.
fn assert_consistent(engine: &EscrowEngine, order_id: &OrderId) {
    let tx = engine.get_transaction(order_id).unwrap();
    let events = engine.events(order_id).unwrap();
    assert_eq!(tx.version, events.len() as u64);
    verify_event_chain(order_id, &events).unwrap();
    if tx.status.is_terminal() {
        assert!(tx.closed_at.is_some());
        assert_eq!(settled_total(&tx), Some(tx.total_amount));
    } else {
        assert!(engine.settlement(order_id).unwrap().is_empty());
    }
}

#[test]
fn happy_path_releases_after_window() {
    let w = world();
    let tx = w
        .engine
        .create_transaction(order("ord-life-1", None), &Actor::PaymentProcessor)
        .unwrap();
    let id = tx.order_id.clone();
    assert_eq!(tx.status, EscrowStatus::PaymentHeld);
    assert_eq!(tx.fee_rate, FeeRate::STANDARD);
    assert_eq!(tx.platform_fee.minor_units(), 3_200);
    assert_eq!(tx.seller_payout.minor_units(), 33_450 - 3_200);

    w.clock.advance(Duration::hours(20));
    w.engine
        .mark_shipped(&id, &seller(), Some("9400111899223856".to_string()))
        .unwrap();
    w.clock.advance(Duration::days(2));
    let tx = w.engine.confirm_delivery(&id, &buyer()).unwrap();
    assert_eq!(
        tx.escrow_expires_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 8, 10, 30, 0).unwrap())
    );

    // Inside the window nothing moves.
    w.clock.advance(Duration::days(2));
    let report = w.scheduler.sweep_expired_escrows();
    assert!(report.released.is_empty());

    w.clock.advance(Duration::days(1));
    let report = w.scheduler.sweep_expired_escrows();
    assert_eq!(report.released, vec![id.clone()]);

    let tx = w.engine.get_transaction(&id).unwrap();
    assert_eq!(tx.status, EscrowStatus::Released);
    let entries = w.engine.settlement(&id).unwrap();
    assert_eq!(entries[0].kind, EntryKind::SellerPayout);
    assert_eq!(entries[0].amount, tx.seller_payout);
    assert_eq!(entries[1].kind, EntryKind::PlatformFee);
    assert_consistent(&w.engine, &id);

    let timeline = w.engine.timeline(&id).unwrap();
    assert_eq!(timeline.len(), 6);
}

#[test]
fn dispute_freezes_release_until_resolved() {
    let w = world();
    let id = w
        .engine
        .create_transaction(order("ord-life-2", None), &Actor::PaymentProcessor)
        .unwrap()
        .order_id;
    w.engine.mark_shipped(&id, &seller(), None).unwrap();
    w.engine.confirm_delivery(&id, &buyer()).unwrap();
    w.clock.advance(Duration::days(1));
    w.engine.open_dispute(&id, &buyer(), &submission()).unwrap();

    w.clock.advance(Duration::days(10));
    let report = w.scheduler.sweep_expired_escrows();
    assert!(report.released.is_empty());
    assert_eq!(
        w.engine.get_transaction(&id).unwrap().status,
        EscrowStatus::Disputed
    );

    let countdown = w.engine.countdown(&id).unwrap().unwrap();
    assert!(countdown.frozen);

    let tx = w
        .engine
        .resolve_dispute(
            &id,
            &arbiter(),
            ResolutionOutcome::Released,
            Some("authentic per legit-check".to_string()),
        )
        .unwrap();
    assert_eq!(tx.status, EscrowStatus::Released);
    let dispute = tx.dispute.unwrap();
    assert_eq!(dispute.resolution.unwrap().outcome, ResolutionOutcome::Released);
    assert_consistent(&w.engine, &id);
}

#[test]
fn refund_settles_full_total_to_buyer() {
    let w = world();
    let id = w
        .engine
        .create_transaction(order("ord-life-3", None), &Actor::PaymentProcessor)
        .unwrap()
        .order_id;
    w.engine.mark_shipped(&id, &seller(), None).unwrap();
    w.engine.open_dispute(&id, &buyer(), &submission()).unwrap();
    let tx = w
        .engine
        .resolve_dispute(&id, &arbiter(), ResolutionOutcome::Refunded, None)
        .unwrap();

    let entries = w.engine.settlement(&id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::BuyerRefund);
    assert_eq!(entries[0].amount, tx.total_amount);
    assert_consistent(&w.engine, &id);
}

#[test]
fn trusted_seller_releases_on_delivery() {
    let w = world();
    let id = w
        .engine
        .create_transaction(order("ord-life-4", Some(0)), &Actor::PaymentProcessor)
        .unwrap()
        .order_id;
    w.engine.mark_shipped(&id, &seller(), None).unwrap();
    let tx = w.engine.confirm_delivery(&id, &buyer()).unwrap();
    assert_eq!(tx.status, EscrowStatus::Released);

    let events = w.engine.events(&id).unwrap();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::Created,
            EventType::Paid,
            EventType::Shipped,
            EventType::Delivered,
            EventType::Released,
        ]
    );
    assert_consistent(&w.engine, &id);
}

#[test]
fn terminal_orders_refuse_every_write() {
    let w = world();
    let id = w
        .engine
        .create_transaction(order("ord-life-5", None), &Actor::PaymentProcessor)
        .unwrap()
        .order_id;
    w.engine.cancel_order(&id, &seller(), None).unwrap();
    let version = w.engine.get_transaction(&id).unwrap().version;

    assert!(w.engine.mark_shipped(&id, &seller(), None).is_err());
    assert!(w.engine.confirm_delivery(&id, &buyer()).is_err());
    assert!(w.engine.open_dispute(&id, &buyer(), &submission()).is_err());
    assert!(w.engine.cancel_order(&id, &arbiter(), None).is_err());
    assert!(w
        .engine
        .resolve_dispute(&id, &arbiter(), ResolutionOutcome::Refunded, None)
        .is_err());

    assert_eq!(w.engine.get_transaction(&id).unwrap().version, version);
    assert_consistent(&w.engine, &id);
}
