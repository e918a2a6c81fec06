//! Shared wiring for the integration tests: the full billing engine on
//! in-memory storage and the sandbox gateway, driven by a settable clock.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;

use procura_billing::adapters::{
    InMemoryAffiliateDirectory, InMemoryAuditLog, InMemoryEventBus, InMemoryIdempotencyStore,
    InMemorySubscriptionRepository, SandboxGateway,
};
use procura_billing::application::billing::{
    AuditRecorder, CommissionGenerator, OpenSubscription, PaymentOrchestrator, RetryExecutor,
    RetryPolicy, SubscriptionLedger,
};
use procura_billing::domain::audit::AuditAction;
use procura_billing::domain::foundation::{
    Money, PlanId, RequestContext, SubscriptionId, TenantId, Timestamp, UserId,
};
use procura_billing::domain::payment::PaymentRequest;
use procura_billing::domain::subscription::{
    BillingInterval, PlanSummary, Subscription, SubscriptionStatus,
};
use procura_billing::ports::{AuditLogRepository, Clock, EventSubscriber};

pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const SUBSCRIBER: i64 = 10;
pub const AFFILIATE: i64 = 77;
pub const TENANT: i64 = 2;

pub struct TestClock(Mutex<Timestamp>);

impl TestClock {
    pub fn at(now: Timestamp) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: Timestamp) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.0.lock().unwrap();
        *now = now.add_days(days);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap()
    }
}

pub struct Engine {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub gateway: Arc<SandboxGateway>,
    pub audit_log: Arc<InMemoryAuditLog>,
    pub events: Arc<InMemoryEventBus>,
    pub affiliates: Arc<InMemoryAffiliateDirectory>,
    pub subscriptions: Arc<InMemorySubscriptionRepository>,
    pub clock: Arc<TestClock>,
}

/// 2025-03-01 12:00 UTC
pub fn t0() -> Timestamp {
    Timestamp::from_datetime(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
}

/// Engine whose retries back off by 1s then 2s.
pub fn engine() -> Engine {
    engine_with_retry(RetryPolicy::default())
}

/// Engine with millisecond backoff for tests that do not measure timing.
pub fn fast_engine() -> Engine {
    engine_with_retry(RetryPolicy::default().with_initial_delay(Duration::from_millis(1)))
}

pub fn engine_with_retry(policy: RetryPolicy) -> Engine {
    let gateway = Arc::new(SandboxGateway::new(SecretString::new(
        WEBHOOK_SECRET.to_string(),
    )));
    let audit_log = Arc::new(InMemoryAuditLog::new());
    let events = Arc::new(InMemoryEventBus::new());
    let affiliates = Arc::new(InMemoryAffiliateDirectory::new());
    let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
    let clock = Arc::new(TestClock::at(t0()));
    let audit = Arc::new(AuditRecorder::new(audit_log.clone()));

    let commissions = CommissionGenerator::new(
        affiliates.clone(),
        audit.clone(),
        events.clone(),
        clock.clone(),
        1000,
    );
    events.subscribe_all(&CommissionGenerator::event_types(), Arc::new(commissions));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway.clone(),
        Arc::new(SubscriptionLedger::new(subscriptions.clone(), 7)),
        Arc::new(InMemoryIdempotencyStore::new()),
        audit,
        events.clone(),
        RetryExecutor::new(policy),
        clock.clone(),
    ));

    Engine {
        orchestrator,
        gateway,
        audit_log,
        events,
        affiliates,
        subscriptions,
        clock,
    }
}

pub fn subscriber_ctx() -> RequestContext {
    RequestContext::for_user(
        Some(TenantId::new(TENANT).unwrap()),
        UserId::new(SUBSCRIBER).unwrap(),
    )
}

pub fn plan() -> PlanSummary {
    PlanSummary::new(
        PlanId::new(1).unwrap(),
        "Profissional",
        Money::new(4990, "BRL").unwrap(),
        BillingInterval::Monthly,
    )
}

pub async fn open(engine: &Engine, initial_status: SubscriptionStatus) -> Subscription {
    engine
        .orchestrator
        .open_subscription(
            &subscriber_ctx(),
            OpenSubscription {
                user_id: UserId::new(SUBSCRIBER).unwrap(),
                tenant_id: Some(TenantId::new(TENANT).unwrap()),
                plan: plan(),
                initial_status,
                grace_period_days: None,
            },
        )
        .await
        .unwrap()
}

pub fn card_charge() -> PaymentRequest {
    PaymentRequest::card(
        Money::new(4990, "BRL").unwrap(),
        "Plano Profissional",
        "cliente@example.com",
        "tok_visa",
        1,
    )
    .unwrap()
}

pub fn pix_charge() -> PaymentRequest {
    PaymentRequest::pix(
        Money::new(4990, "BRL").unwrap(),
        "Plano Profissional",
        "cliente@example.com",
    )
    .unwrap()
}

pub async fn audit_actions(engine: &Engine, id: SubscriptionId) -> Vec<AuditAction> {
    engine
        .audit_log
        .find_by_model("Subscription", &id.to_string())
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}
