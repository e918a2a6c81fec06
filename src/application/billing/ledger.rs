//! Subscription ledger - the only writer of subscription state.
//!
//! Every mutation loads the aggregate, applies one transition, and persists
//! it with a conditional write on the loaded status and version. A writer
//! that loses the race reloads and re-applies its transition; it only
//! reports the operation as already applied when the winner applied it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionId, TenantId, Timestamp, UserId,
};
use crate::domain::subscription::{
    AppliedPayment, PlanSummary, Subscription, SubscriptionError, SubscriptionStatus,
};
use crate::ports::{SubscriptionRepository, WriteOutcome};

/// Conditional-write attempts before a mutation gives up on a contended row.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Storage(#[from] DomainError),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::Subscription(err) => err.code(),
            LedgerError::Storage(err) => err.code,
        }
    }
}

impl From<LedgerError> for DomainError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Subscription(err) => err.into(),
            LedgerError::Storage(err) => err,
        }
    }
}

/// Input for opening a subscription.
#[derive(Debug, Clone)]
pub struct OpenSubscription {
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub plan: PlanSummary,
    /// `Trial` or `Pending`; chosen by the caller's onboarding policy.
    pub initial_status: SubscriptionStatus,
    /// Overrides the ledger default when set.
    pub grace_period_days: Option<u32>,
}

/// What a ledger mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied {
        before: Subscription,
        after: Subscription,
    },
    /// Already in the requested state, or a concurrent writer got there first.
    Unchanged(Subscription),
}

impl LedgerOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            LedgerOutcome::Applied { after, .. } => after,
            LedgerOutcome::Unchanged(subscription) => subscription,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, LedgerOutcome::Applied { .. })
    }
}

pub struct SubscriptionLedger {
    repository: Arc<dyn SubscriptionRepository>,
    default_grace_period_days: u32,
}

impl SubscriptionLedger {
    pub fn new(repository: Arc<dyn SubscriptionRepository>, default_grace_period_days: u32) -> Self {
        Self {
            repository,
            default_grace_period_days,
        }
    }

    /// Opens a subscription in trial or pending.
    pub async fn open(
        &self,
        command: OpenSubscription,
        now: Timestamp,
    ) -> Result<Subscription, LedgerError> {
        let subscription = Subscription::create(
            SubscriptionId::new(),
            command.user_id,
            command.tenant_id,
            command.plan,
            command.initial_status,
            command
                .grace_period_days
                .unwrap_or(self.default_grace_period_days),
            now,
        )?;
        self.repository.insert(&subscription).await?;

        info!(
            subscription_id = %subscription.id(),
            user_id = subscription.user_id().value(),
            status = %subscription.status(),
            "subscription opened"
        );
        Ok(subscription)
    }

    pub async fn get(&self, id: SubscriptionId) -> Result<Subscription, LedgerError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::Subscription(SubscriptionError::NotFound(id)))
    }

    /// Active or awaiting-payment subscriptions whose grace window elapsed.
    pub async fn overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, LedgerError> {
        Ok(self.repository.find_overdue(now).await?)
    }

    /// Applies an approved charge, activating or renewing the subscription.
    ///
    /// Re-applying the same approval is a no-op.
    pub async fn record_approval(
        &self,
        id: SubscriptionId,
        payment: AppliedPayment,
        now: Timestamp,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.apply(id, "approve", move |subscription| {
            if subscription.has_applied_approval(&payment.idempotency_key) {
                return Ok(false);
            }
            let (start, end) = subscription.next_period(now);
            subscription.record_approval(payment.clone(), start, end, now)?;
            Ok(true)
        })
        .await
    }

    /// Applies a rejected or failed charge.
    ///
    /// Re-applying the same rejection is a no-op.
    pub async fn record_rejection(
        &self,
        id: SubscriptionId,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.apply(id, "reject", |subscription| {
            if subscription.has_applied_rejection(idempotency_key) {
                return Ok(false);
            }
            subscription.record_rejection(idempotency_key, now)?;
            Ok(true)
        })
        .await
    }

    /// Cancels; cancelling a cancelled subscription is a no-op.
    pub async fn cancel(
        &self,
        id: SubscriptionId,
        now: Timestamp,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.apply(id, "cancel", |subscription| subscription.cancel(now))
            .await
    }

    pub async fn expire(
        &self,
        id: SubscriptionId,
        now: Timestamp,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.apply(id, "expire", |subscription| {
            if subscription.status() == SubscriptionStatus::Expired {
                return Ok(false);
            }
            subscription.expire(now)?;
            Ok(true)
        })
        .await
    }

    pub async fn suspend(
        &self,
        id: SubscriptionId,
        now: Timestamp,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.apply(id, "suspend", |subscription| {
            if subscription.status() == SubscriptionStatus::Suspended {
                return Ok(false);
            }
            subscription.suspend(now)?;
            Ok(true)
        })
        .await
    }

    /// Loads, mutates, and conditionally writes back one subscription.
    ///
    /// `mutate` returns `Ok(false)` when there is nothing to change. On a
    /// write conflict the row is reloaded and `mutate` runs again against
    /// the winner's state, so idempotent mutations see their own key.
    async fn apply<F>(
        &self,
        id: SubscriptionId,
        operation: &'static str,
        mutate: F,
    ) -> Result<LedgerOutcome, LedgerError>
    where
        F: Fn(&mut Subscription) -> Result<bool, SubscriptionError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let before = self.get(id).await?;
            let mut after = before.clone();
            if !mutate(&mut after)? {
                return Ok(LedgerOutcome::Unchanged(before));
            }

            match self
                .repository
                .update_if(&after, before.status(), before.version())
                .await?
            {
                WriteOutcome::Applied => {
                    info!(
                        subscription_id = %id,
                        operation,
                        from = %before.status(),
                        to = %after.status(),
                        version = after.version(),
                        "subscription updated"
                    );
                    return Ok(LedgerOutcome::Applied { before, after });
                }
                WriteOutcome::Conflict => {
                    warn!(
                        subscription_id = %id,
                        operation,
                        attempt,
                        expected_status = %before.status(),
                        expected_version = before.version(),
                        "concurrent subscription write detected, reloading"
                    );
                }
            }
        }

        Err(LedgerError::Storage(
            DomainError::new(
                ErrorCode::ConcurrentModification,
                format!("subscription {} kept changing during {}", id, operation),
            )
            .with_detail("subscription_id", id.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::domain::foundation::{Money, PlanId};
    use crate::domain::payment::PaymentMethod;
    use crate::domain::subscription::BillingInterval;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn t0() -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }

    fn plan() -> PlanSummary {
        PlanSummary::new(
            PlanId::new(1).unwrap(),
            "Profissional",
            Money::new(4990, "BRL").unwrap(),
            BillingInterval::Monthly,
        )
    }

    fn open_command(status: SubscriptionStatus) -> OpenSubscription {
        OpenSubscription {
            user_id: UserId::new(10).unwrap(),
            tenant_id: Some(TenantId::new(2).unwrap()),
            plan: plan(),
            initial_status: status,
            grace_period_days: None,
        }
    }

    fn payment(key: &str) -> AppliedPayment {
        AppliedPayment {
            idempotency_key: key.to_string(),
            external_id: "tx_1".to_string(),
            amount: Money::new(4990, "BRL").unwrap(),
            method: PaymentMethod::CreditCard,
        }
    }

    fn ledger() -> SubscriptionLedger {
        SubscriptionLedger::new(Arc::new(InMemorySubscriptionRepository::new()), 7)
    }

    #[tokio::test]
    async fn open_persists_with_default_grace() {
        let ledger = ledger();
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();

        let loaded = ledger.get(sub.id()).await.unwrap();
        assert_eq!(loaded, sub);
        assert_eq!(loaded.grace_period_days(), 7);
    }

    #[tokio::test]
    async fn open_rejects_active_initial_status() {
        let ledger = ledger();
        let err = ledger
            .open(open_command(SubscriptionStatus::Active), t0())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Subscription(SubscriptionError::InvalidInitialStatus(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_subscription_is_not_found() {
        let err = ledger().get(SubscriptionId::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SubscriptionNotFound);
    }

    #[tokio::test]
    async fn approval_applies_once_per_key() {
        let ledger = ledger();
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();

        let first = ledger.record_approval(sub.id(), payment("k1"), t0()).await.unwrap();
        let second = ledger.record_approval(sub.id(), payment("k1"), t0()).await.unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        let stored = ledger.get(sub.id()).await.unwrap();
        assert_eq!(stored.status(), SubscriptionStatus::Active);
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.period_end(), Some(t0().add_days(30)));
    }

    #[tokio::test]
    async fn rejection_then_approval_under_same_key_both_apply() {
        let ledger = ledger();
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();

        let rejected = ledger.record_rejection(sub.id(), "k1", t0()).await.unwrap();
        assert_eq!(
            rejected.subscription().status(),
            SubscriptionStatus::AwaitingPayment
        );

        let approved = ledger.record_approval(sub.id(), payment("k1"), t0()).await.unwrap();
        assert!(approved.is_applied());
        assert_eq!(approved.subscription().status(), SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn cancel_twice_reports_unchanged() {
        let ledger = ledger();
        let sub = ledger
            .open(open_command(SubscriptionStatus::Pending), t0())
            .await
            .unwrap();

        assert!(ledger.cancel(sub.id(), t0()).await.unwrap().is_applied());
        let again = ledger.cancel(sub.id(), t0()).await.unwrap();
        assert!(!again.is_applied());
        assert_eq!(again.subscription().status(), SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn approval_of_cancelled_subscription_is_an_error() {
        let ledger = ledger();
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();
        ledger.cancel(sub.id(), t0()).await.unwrap();

        let err = ledger
            .record_approval(sub.id(), payment("k1"), t0())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    }

    struct AlwaysConflicting {
        inner: InMemorySubscriptionRepository,
    }

    #[async_trait]
    impl SubscriptionRepository for AlwaysConflicting {
        async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
            self.inner.insert(subscription).await
        }

        async fn find_by_id(
            &self,
            id: SubscriptionId,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.find_by_id(id).await
        }

        async fn update_if(
            &self,
            _subscription: &Subscription,
            _expected_status: SubscriptionStatus,
            _expected_version: u64,
        ) -> Result<WriteOutcome, DomainError> {
            Ok(WriteOutcome::Conflict)
        }

        async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
            self.inner.find_overdue(now).await
        }
    }

    #[tokio::test]
    async fn write_that_never_lands_surfaces_as_concurrent_modification() {
        let ledger = SubscriptionLedger::new(
            Arc::new(AlwaysConflicting {
                inner: InMemorySubscriptionRepository::new(),
            }),
            7,
        );
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();

        let err = ledger
            .record_approval(sub.id(), payment("k1"), t0())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ConcurrentModification);
    }

    type Interference = Box<dyn FnOnce(&mut Subscription) + Send>;

    /// Commits `interference` just before the first conditional write lands.
    struct RacingWriter {
        inner: InMemorySubscriptionRepository,
        interference: Mutex<Option<Interference>>,
    }

    impl RacingWriter {
        fn new(interference: impl FnOnce(&mut Subscription) + Send + 'static) -> Self {
            Self {
                inner: InMemorySubscriptionRepository::new(),
                interference: Mutex::new(Some(Box::new(interference))),
            }
        }
    }

    #[async_trait]
    impl SubscriptionRepository for RacingWriter {
        async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
            self.inner.insert(subscription).await
        }

        async fn find_by_id(
            &self,
            id: SubscriptionId,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.find_by_id(id).await
        }

        async fn update_if(
            &self,
            subscription: &Subscription,
            expected_status: SubscriptionStatus,
            expected_version: u64,
        ) -> Result<WriteOutcome, DomainError> {
            let interference = self.interference.lock().unwrap().take();
            if let Some(interfere) = interference {
                let mut winner = self.inner.find_by_id(subscription.id()).await?.unwrap();
                let (status, version) = (winner.status(), winner.version());
                interfere(&mut winner);
                self.inner.update_if(&winner, status, version).await?;
            }
            self.inner
                .update_if(subscription, expected_status, expected_version)
                .await
        }

        async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
            self.inner.find_overdue(now).await
        }
    }

    #[tokio::test]
    async fn approval_survives_an_unrelated_concurrent_write() {
        let ledger = SubscriptionLedger::new(
            Arc::new(RacingWriter::new(|sub| {
                sub.record_rejection("other_key", t0()).unwrap();
            })),
            7,
        );
        let sub = ledger
            .open(open_command(SubscriptionStatus::Pending), t0())
            .await
            .unwrap();

        let outcome = ledger.record_approval(sub.id(), payment("k1"), t0()).await.unwrap();

        assert!(outcome.is_applied());
        let stored = ledger.get(sub.id()).await.unwrap();
        assert_eq!(stored.status(), SubscriptionStatus::Active);
        assert!(stored.has_applied_approval("k1"));
        assert_eq!(stored.version(), 2);
    }

    #[tokio::test]
    async fn losing_to_the_same_approval_reports_unchanged() {
        let ledger = SubscriptionLedger::new(
            Arc::new(RacingWriter::new(|sub| {
                let (start, end) = sub.next_period(t0());
                sub.record_approval(payment("k1"), start, end, t0()).unwrap();
            })),
            7,
        );
        let sub = ledger
            .open(open_command(SubscriptionStatus::Trial), t0())
            .await
            .unwrap();

        let outcome = ledger.record_approval(sub.id(), payment("k1"), t0()).await.unwrap();

        assert!(!outcome.is_applied());
        assert_eq!(outcome.subscription().status(), SubscriptionStatus::Active);
        assert_eq!(outcome.subscription().version(), 1);
    }
}
