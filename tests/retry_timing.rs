//! Gateway retries measured on a paused tokio clock: 1s then 2s of backoff,
//! one idempotency key across attempts, and a released key after exhaustion.

mod common;

use std::time::Duration;

use tokio::time::Instant;

use common::{card_charge, engine, open, subscriber_ctx};
use procura_billing::application::billing::{ChargeCommand, ChargeError, ChargeOutcome};
use procura_billing::domain::subscription::SubscriptionStatus;
use procura_billing::ports::PaymentErrorCode;

#[tokio::test(start_paused = true)]
async fn two_outages_are_absorbed_with_exponential_backoff() {
    let engine = engine();
    let sub = open(&engine, SubscriptionStatus::Trial).await;
    engine.gateway.fail_transiently(2);

    let started = Instant::now();
    let outcome = engine
        .orchestrator
        .charge(&subscriber_ctx(), ChargeCommand::new(sub.id(), card_charge()))
        .await
        .unwrap();

    assert!(matches!(outcome, ChargeOutcome::Approved { .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(engine.gateway.call_count(), 3);
    assert_eq!(engine.gateway.charge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_the_gateway_error_and_free_the_key() {
    let engine = engine();
    let sub = open(&engine, SubscriptionStatus::Trial).await;
    engine.gateway.fail_transiently(3);

    let started = Instant::now();
    let err = engine
        .orchestrator
        .charge(&subscriber_ctx(), ChargeCommand::new(sub.id(), card_charge()))
        .await
        .unwrap_err();

    let ChargeError::Gateway(gateway_err) = err else {
        panic!("expected gateway error, got {:?}", err);
    };
    assert_eq!(gateway_err.code, PaymentErrorCode::ProviderUnavailable);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(engine.gateway.call_count(), 3);

    let view = engine.orchestrator.view(sub.id()).await.unwrap();
    assert_eq!(view.status, SubscriptionStatus::Trial);

    // The same cycle can be charged again once the processor is back.
    let retried = engine
        .orchestrator
        .charge(&subscriber_ctx(), ChargeCommand::new(sub.id(), card_charge()))
        .await
        .unwrap();
    assert!(matches!(retried, ChargeOutcome::Approved { .. }));
    assert_eq!(engine.gateway.charge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn replayed_charge_does_not_wait_or_call_the_gateway() {
    let engine = engine();
    let sub = open(&engine, SubscriptionStatus::Trial).await;
    engine
        .orchestrator
        .charge(&subscriber_ctx(), ChargeCommand::new(sub.id(), card_charge()))
        .await
        .unwrap();

    let started = Instant::now();
    let replay = engine
        .orchestrator
        .charge(&subscriber_ctx(), ChargeCommand::new(sub.id(), card_charge()))
        .await
        .unwrap();

    assert!(matches!(replay, ChargeOutcome::Duplicate { .. }));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(engine.gateway.call_count(), 1);
}
