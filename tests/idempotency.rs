use chrono::TimeDelta;
use claims::{assert_matches, assert_ok, assert_some};
use rust_decimal::dec;
use tokio::task::JoinSet;

use transfer_engine::models::Money;
use transfer_engine::models::entry::{Reference, TransferKind};
use transfer_engine::models::request::{Destination, IdempotencyKey, RequestShape};
use transfer_engine::models::user::UserId;
use transfer_engine::prelude::{Clock, IdempotencyRepository, Page, TransferError};
use transfer_engine::repository::idempotency::{IdempotencyRecord, ReservationState};

use setup::{Components, internal, session};

mod setup;

#[tokio::test]
async fn a_retried_request_is_applied_once() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(1000)).await;
    let b = fx.open_account("acc-b", "u2", dec!(500)).await;

    let first = assert_ok!(
        fx.engine
            .move_funds(&session("u1"), internal(&a, &b, dec!(200), "k-1"))
            .await
    );
    let second = assert_ok!(
        fx.engine
            .move_funds(&session("u1"), internal(&a, &b, dec!(200), "k-1"))
            .await
    );

    assert_eq!(first, second, "The replay must hand back the original entries");
    assert_eq!(fx.balance(&a).await, Money::from_minor(80_000));
    assert_eq!(fx.balance(&b).await, Money::from_minor(70_000));

    let history = assert_ok!(
        fx.engine
            .entries_for_account(&session("u1"), &a, Page::default())
            .await
    );
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn a_key_reused_for_another_request_conflicts() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(1000)).await;
    let b = fx.open_account("acc-b", "u2", dec!(500)).await;
    assert_ok!(
        fx.engine
            .move_funds(&session("u1"), internal(&a, &b, dec!(200), "k-1"))
            .await
    );

    let res = fx
        .engine
        .move_funds(&session("u1"), internal(&a, &b, dec!(300), "k-1"))
        .await;

    assert_matches!(res, Err(TransferError::Conflict(_)));
    assert_eq!(fx.balance(&a).await, Money::from_minor(80_000));
}

#[tokio::test]
async fn a_refused_request_can_be_retried_with_its_key() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(100)).await;
    let b = fx.open_account("acc-b", "u2", dec!(0)).await;
    let c = fx.open_account("acc-c", "u3", dec!(100)).await;

    let refused = fx
        .engine
        .move_funds(&session("u1"), internal(&a, &b, dec!(150), "k-1"))
        .await;
    assert_matches!(refused, Err(TransferError::InsufficientFunds { .. }));

    assert_ok!(fx.engine.move_funds(&session("u3"), internal(&c, &a, dec!(50), "k-2")).await);
    assert_ok!(
        fx.engine
            .move_funds(&session("u1"), internal(&a, &b, dec!(150), "k-1"))
            .await
    );

    assert_eq!(fx.balance(&b).await, Money::from_minor(15_000));
}

#[tokio::test]
async fn an_abandoned_reservation_is_reclaimed_after_the_timeout() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(1000)).await;
    let b = fx.open_account("acc-b", "u2", dec!(500)).await;
    let key = IdempotencyKey::new("k-1");

    // a process reserved the key and died before committing
    let shape = RequestShape {
        user_id: UserId::new("u1"),
        kind: TransferKind::BankTransfer,
        source: a.clone(),
        destination: Destination::Internal(b.clone()),
        amount: Money::from_minor(20_000),
    };
    let abandoned = Reference::new_at(fx.clock.now());
    let existing = fx
        .store
        .try_reserve(IdempotencyRecord::reserved(key.clone(), shape, abandoned, fx.clock.now()))
        .await
        .unwrap();
    assert!(existing.is_none());

    let in_flight = fx
        .engine
        .move_funds(&session("u1"), internal(&a, &b, dec!(200), "k-1"))
        .await;
    assert_matches!(in_flight, Err(TransferError::Conflict(_)));

    fx.clock.advance(TimeDelta::seconds(301));
    let entries = assert_ok!(
        fx.engine
            .move_funds(&session("u1"), internal(&a, &b, dec!(200), "k-1"))
            .await
    );

    assert_ne!(entries[0].reference, abandoned);
    assert_eq!(fx.balance(&a).await, Money::from_minor(80_000));
    let record = assert_some!(fx.store.idempotency_record(&key).await.unwrap());
    assert_matches!(
        record.state,
        ReservationState::Completed { reference, .. } if reference == entries[0].reference
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_of_one_key_debit_once() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(1000)).await;
    let b = fx.open_account("acc-b", "u2", dec!(0)).await;

    let mut submissions = JoinSet::new();
    for _ in 0..10 {
        let engine = fx.engine.clone();
        let request = internal(&a, &b, dec!(100), "k-1");
        submissions.spawn(async move { engine.move_funds(&session("u1"), request).await });
    }
    let results = submissions.join_all().await;

    let applied: Vec<_> = results.iter().filter_map(|res| res.as_ref().ok()).collect();
    assert!(!applied.is_empty(), "At least one submission must go through");
    for res in &results {
        assert!(
            matches!(res, Ok(_) | Err(TransferError::Conflict(_))),
            "Unexpected outcome: {res:?}"
        );
    }
    assert!(applied.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(fx.balance(&a).await, Money::from_minor(90_000));
    assert_eq!(fx.balance(&b).await, Money::from_minor(10_000));
    let history = assert_ok!(
        fx.engine
            .entries_for_account(&session("u1"), &a, Page::default())
            .await
    );
    assert_eq!(history.len(), 1);
}
