//! Subscription aggregate entity.
//!
//! The Subscription aggregate represents a tenant user's paid access to the
//! back office. Its state only changes through the methods below, which the
//! ledger invokes; presentation code reads it through `SubscriptionView`.
//!
//! # Design Decisions
//!
//! - **Time is an argument**: every query and mutation takes `now`
//! - **Money in minor units**: `amount_paid` is a `Money`, never a float
//! - **Version per write**: each mutation bumps `version` for conditional writes

use serde::{Deserialize, Serialize};

use super::{PlanSummary, SubscriptionError, SubscriptionStatus};
use crate::domain::foundation::{
    Money, StateMachine, SubscriptionId, TenantId, Timestamp, UserId,
};
use crate::domain::payment::PaymentMethod;

/// Default number of days a lapsed subscription stays usable.
pub const DEFAULT_GRACE_PERIOD_DAYS: u32 = 7;

const SECONDS_PER_DAY: i64 = 86_400;

const APPROVAL_MARKER: &str = "approved";
const REJECTION_MARKER: &str = "rejected";

fn charge_marker(idempotency_key: &str, outcome: &str) -> String {
    format!("{idempotency_key}:{outcome}")
}

/// Settled charge details applied to the subscription on approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayment {
    pub idempotency_key: String,
    pub external_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
}

/// Subscription aggregate.
///
/// # Invariants
///
/// - `period_end` is never before `period_start`
/// - `amount_paid` is never negative (enforced by `Money`)
/// - Status transitions follow `SubscriptionStatus` state machine rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    user_id: UserId,
    tenant_id: Option<TenantId>,
    plan: PlanSummary,
    status: SubscriptionStatus,
    period_start: Option<Timestamp>,
    period_end: Option<Timestamp>,
    grace_period_days: u32,
    amount_paid: Money,
    payment_method: Option<PaymentMethod>,
    external_transaction_id: Option<String>,
    failed_charge_attempts: u32,
    last_charge_marker: Option<String>,
    version: u64,
    created_at: Timestamp,
    updated_at: Timestamp,
    cancelled_at: Option<Timestamp>,
}

/// Flat, public form of a subscription used by repositories to persist and
/// rebuild the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub plan: PlanSummary,
    pub status: SubscriptionStatus,
    pub period_start: Option<Timestamp>,
    pub period_end: Option<Timestamp>,
    pub grace_period_days: u32,
    pub amount_paid: Money,
    pub payment_method: Option<PaymentMethod>,
    pub external_transaction_id: Option<String>,
    pub failed_charge_attempts: u32,
    pub last_charge_marker: Option<String>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub cancelled_at: Option<Timestamp>,
}

impl Subscription {
    /// Creates a subscription in `Trial` or `Pending`.
    ///
    /// The initial status is caller policy; anything else is rejected.
    pub fn create(
        id: SubscriptionId,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        plan: PlanSummary,
        initial_status: SubscriptionStatus,
        grace_period_days: u32,
        now: Timestamp,
    ) -> Result<Self, SubscriptionError> {
        if !matches!(
            initial_status,
            SubscriptionStatus::Trial | SubscriptionStatus::Pending
        ) {
            return Err(SubscriptionError::InvalidInitialStatus(initial_status));
        }

        let amount_paid = plan.price.zeroed();
        Ok(Self {
            id,
            user_id,
            tenant_id,
            plan,
            status: initial_status,
            period_start: None,
            period_end: None,
            grace_period_days,
            amount_paid,
            payment_method: None,
            external_transaction_id: None,
            failed_charge_attempts: 0,
            last_charge_marker: None,
            version: 0,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        })
    }

    /// Rebuilds an aggregate from persisted state, re-checking invariants.
    pub fn from_snapshot(snapshot: SubscriptionSnapshot) -> Result<Self, SubscriptionError> {
        if let (Some(start), Some(end)) = (snapshot.period_start, snapshot.period_end) {
            if end.is_before(&start) {
                return Err(SubscriptionError::InvalidPeriod { start, end });
            }
        }

        Ok(Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            tenant_id: snapshot.tenant_id,
            plan: snapshot.plan,
            status: snapshot.status,
            period_start: snapshot.period_start,
            period_end: snapshot.period_end,
            grace_period_days: snapshot.grace_period_days,
            amount_paid: snapshot.amount_paid,
            payment_method: snapshot.payment_method,
            external_transaction_id: snapshot.external_transaction_id,
            failed_charge_attempts: snapshot.failed_charge_attempts,
            last_charge_marker: snapshot.last_charge_marker,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            cancelled_at: snapshot.cancelled_at,
        })
    }

    pub fn to_snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: self.id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            plan: self.plan.clone(),
            status: self.status,
            period_start: self.period_start,
            period_end: self.period_end,
            grace_period_days: self.grace_period_days,
            amount_paid: self.amount_paid.clone(),
            payment_method: self.payment_method,
            external_transaction_id: self.external_transaction_id.clone(),
            failed_charge_attempts: self.failed_charge_attempts,
            last_charge_marker: self.last_charge_marker.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn plan(&self) -> &PlanSummary {
        &self.plan
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn period_start(&self) -> Option<Timestamp> {
        self.period_start
    }

    pub fn period_end(&self) -> Option<Timestamp> {
        self.period_end
    }

    pub fn grace_period_days(&self) -> u32 {
        self.grace_period_days
    }

    pub fn amount_paid(&self) -> &Money {
        &self.amount_paid
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method
    }

    pub fn external_transaction_id(&self) -> Option<&str> {
        self.external_transaction_id.as_deref()
    }

    /// Consecutive rejected charges since the last approval.
    pub fn failed_charge_attempts(&self) -> u32 {
        self.failed_charge_attempts
    }

    /// Idempotency key and outcome of the last charge applied, as `key:outcome`.
    pub fn last_charge_marker(&self) -> Option<&str> {
        self.last_charge_marker.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn cancelled_at(&self) -> Option<Timestamp> {
        self.cancelled_at
    }

    /// True when the approval of the charge identified by `key` is already applied.
    pub fn has_applied_approval(&self, key: &str) -> bool {
        self.last_charge_marker.as_deref() == Some(charge_marker(key, APPROVAL_MARKER).as_str())
    }

    /// True when the rejection of the charge identified by `key` is already applied.
    pub fn has_applied_rejection(&self, key: &str) -> bool {
        self.last_charge_marker.as_deref() == Some(charge_marker(key, REJECTION_MARKER).as_str())
    }

    // ------------------------------------------------------------------
    // Derived queries
    // ------------------------------------------------------------------

    /// Last instant at which a lapsed subscription is still in grace.
    pub fn grace_deadline(&self) -> Option<Timestamp> {
        self.period_end
            .map(|end| end.add_days(i64::from(self.grace_period_days)))
    }

    /// Period end and grace window have both elapsed.
    ///
    /// A subscription without a period end never expires.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.grace_deadline()
            .map(|deadline| now.is_after(&deadline))
            .unwrap_or(false)
    }

    /// `period_end < now <= period_end + grace`.
    pub fn in_grace_period(&self, now: Timestamp) -> bool {
        match (self.period_end, self.grace_deadline()) {
            (Some(end), Some(deadline)) => now.is_after(&end) && !now.is_after(&deadline),
            _ => false,
        }
    }

    pub fn is_active(&self, now: Timestamp) -> bool {
        self.status == SubscriptionStatus::Active && !self.is_expired(now)
    }

    /// Whether the subscriber may use the product right now, grace included.
    pub fn is_usable(&self, now: Timestamp) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Trial
                | SubscriptionStatus::Pending
                | SubscriptionStatus::Active
                | SubscriptionStatus::AwaitingPayment
        ) && !self.is_expired(now)
    }

    /// Whole days until `period_end`, rounded up; 0 once it has passed.
    pub fn days_remaining(&self, now: Timestamp) -> u32 {
        let Some(end) = self.period_end else {
            return 0;
        };
        let seconds = end.duration_since(&now).num_seconds();
        if seconds <= 0 {
            return 0;
        }
        let days = (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    /// Period that an approval at `now` would grant.
    ///
    /// A still-running active period is extended from its current end;
    /// otherwise a fresh period starts at `now`.
    pub fn next_period(&self, now: Timestamp) -> (Timestamp, Timestamp) {
        let length = self.plan.interval.duration();
        match (self.status, self.period_start, self.period_end) {
            (SubscriptionStatus::Active, Some(start), Some(end)) if end.is_after(&now) => {
                (start, end.plus(length))
            }
            _ => (now, now.plus(length)),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Applies an approved charge: status becomes `Active` with the new period.
    ///
    /// # Errors
    ///
    /// Fails from a terminal status or when the period is inverted.
    pub fn record_approval(
        &mut self,
        payment: AppliedPayment,
        period_start: Timestamp,
        period_end: Timestamp,
        now: Timestamp,
    ) -> Result<(), SubscriptionError> {
        if self.status.is_terminal() {
            return Err(SubscriptionError::invalid_transition(self.status, "approve"));
        }
        if period_end.is_before(&period_start) {
            return Err(SubscriptionError::InvalidPeriod {
                start: period_start,
                end: period_end,
            });
        }

        self.transition_to(SubscriptionStatus::Active, "approve")?;
        self.period_start = Some(period_start);
        self.period_end = Some(period_end);
        self.amount_paid = payment.amount;
        self.payment_method = Some(payment.method);
        self.external_transaction_id = Some(payment.external_id);
        self.failed_charge_attempts = 0;
        self.last_charge_marker = Some(charge_marker(&payment.idempotency_key, APPROVAL_MARKER));
        self.touch(now);
        Ok(())
    }

    /// Applies a rejected or failed charge and returns the outstanding
    /// attempt count.
    ///
    /// Active and trial subscriptions move to `AwaitingPayment`; other
    /// non-terminal statuses keep their status.
    pub fn record_rejection(
        &mut self,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Result<u32, SubscriptionError> {
        if self.status.is_terminal() {
            return Err(SubscriptionError::invalid_transition(self.status, "reject"));
        }

        if self.status.rejection_moves_to_awaiting() {
            self.transition_to(SubscriptionStatus::AwaitingPayment, "reject")?;
        }
        self.failed_charge_attempts = self.failed_charge_attempts.saturating_add(1);
        self.last_charge_marker = Some(charge_marker(idempotency_key, REJECTION_MARKER));
        self.touch(now);
        Ok(self.failed_charge_attempts)
    }

    /// Cancels the subscription.
    ///
    /// Returns `Ok(false)` when it was already cancelled; nothing changes.
    pub fn cancel(&mut self, now: Timestamp) -> Result<bool, SubscriptionError> {
        if self.status == SubscriptionStatus::Cancelled {
            return Ok(false);
        }
        self.transition_to(SubscriptionStatus::Cancelled, "cancel")?;
        self.cancelled_at = Some(now);
        self.touch(now);
        Ok(true)
    }

    /// Expires an active or awaiting-payment subscription whose grace
    /// window has elapsed.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), SubscriptionError> {
        if !self.status.can_expire() {
            return Err(SubscriptionError::invalid_transition(self.status, "expire"));
        }
        if !self.is_expired(now) {
            return Err(SubscriptionError::NotYetExpired);
        }
        self.transition_to(SubscriptionStatus::Expired, "expire")?;
        self.touch(now);
        Ok(())
    }

    /// Puts the subscription on administrative hold.
    pub fn suspend(&mut self, now: Timestamp) -> Result<(), SubscriptionError> {
        self.transition_to(SubscriptionStatus::Suspended, "suspend")?;
        self.touch(now);
        Ok(())
    }

    fn transition_to(
        &mut self,
        target: SubscriptionStatus,
        operation: &'static str,
    ) -> Result<(), SubscriptionError> {
        self.status = self
            .status
            .transition_to(target)
            .map_err(|_| SubscriptionError::invalid_transition(self.status, operation))?;
        Ok(())
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::PlanId;
    use crate::domain::subscription::BillingInterval;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

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

    fn subscription(status: SubscriptionStatus) -> Subscription {
        Subscription::create(
            SubscriptionId::new(),
            UserId::new(10).unwrap(),
            Some(TenantId::new(2).unwrap()),
            plan(),
            status,
            DEFAULT_GRACE_PERIOD_DAYS,
            t0(),
        )
        .unwrap()
    }

    fn payment(key: &str) -> AppliedPayment {
        AppliedPayment {
            idempotency_key: key.to_string(),
            external_id: "tx_1".to_string(),
            amount: Money::new(4990, "BRL").unwrap(),
            method: PaymentMethod::CreditCard,
        }
    }

    fn approved_at(now: Timestamp) -> Subscription {
        let mut sub = subscription(SubscriptionStatus::Trial);
        let (start, end) = sub.next_period(now);
        sub.record_approval(payment("k1"), start, end, now).unwrap();
        sub
    }

    fn in_status(status: SubscriptionStatus) -> Subscription {
        let mut snapshot = subscription(SubscriptionStatus::Trial).to_snapshot();
        snapshot.status = status;
        Subscription::from_snapshot(snapshot).unwrap()
    }

    // Construction

    #[test]
    fn create_accepts_trial_and_pending_only() {
        assert_eq!(subscription(SubscriptionStatus::Trial).status(), SubscriptionStatus::Trial);
        assert_eq!(
            subscription(SubscriptionStatus::Pending).status(),
            SubscriptionStatus::Pending
        );

        let result = Subscription::create(
            SubscriptionId::new(),
            UserId::new(10).unwrap(),
            None,
            plan(),
            SubscriptionStatus::Active,
            7,
            t0(),
        );
        assert_eq!(
            result,
            Err(SubscriptionError::InvalidInitialStatus(SubscriptionStatus::Active))
        );
    }

    #[test]
    fn new_subscription_has_no_period_and_zero_paid() {
        let sub = subscription(SubscriptionStatus::Trial);
        assert!(sub.period_end().is_none());
        assert!(sub.amount_paid().is_zero());
        assert_eq!(sub.amount_paid().currency(), "BRL");
        assert_eq!(sub.version(), 0);
    }

    #[test]
    fn from_snapshot_rejects_inverted_period() {
        let mut snapshot = subscription(SubscriptionStatus::Trial).to_snapshot();
        snapshot.period_start = Some(t0());
        snapshot.period_end = Some(t0().minus_days(1));
        assert!(matches!(
            Subscription::from_snapshot(snapshot),
            Err(SubscriptionError::InvalidPeriod { .. })
        ));
    }

    // Approval

    #[test]
    fn approval_from_trial_activates_for_one_interval() {
        let sub = approved_at(t0());

        assert_eq!(sub.status(), SubscriptionStatus::Active);
        assert_eq!(sub.period_start(), Some(t0()));
        assert_eq!(sub.period_end(), Some(t0().add_days(30)));
        assert_eq!(sub.external_transaction_id(), Some("tx_1"));
        assert_eq!(sub.amount_paid().amount_minor(), 4990);
        assert!(sub.has_applied_approval("k1"));
        assert!(!sub.has_applied_rejection("k1"));
        assert_eq!(sub.version(), 1);
    }

    #[test]
    fn approval_from_every_non_terminal_status_activates() {
        for status in SubscriptionStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let mut sub = in_status(status);
            let (start, end) = sub.next_period(t0());
            sub.record_approval(payment("k"), start, end, t0()).unwrap();
            assert_eq!(sub.status(), SubscriptionStatus::Active, "from {:?}", status);
        }
    }

    #[test]
    fn approval_from_terminal_status_fails() {
        for status in [SubscriptionStatus::Cancelled, SubscriptionStatus::Expired] {
            let mut sub = in_status(status);
            let result = sub.record_approval(payment("k"), t0(), t0().add_days(30), t0());
            assert!(matches!(
                result,
                Err(SubscriptionError::InvalidTransition { operation: "approve", .. })
            ));
            assert_eq!(sub.status(), status);
        }
    }

    #[test]
    fn approval_rejects_inverted_period() {
        let mut sub = subscription(SubscriptionStatus::Trial);
        let result = sub.record_approval(payment("k"), t0(), t0().minus_days(1), t0());
        assert!(matches!(result, Err(SubscriptionError::InvalidPeriod { .. })));
        assert_eq!(sub.status(), SubscriptionStatus::Trial);
    }

    #[test]
    fn renewal_extends_running_period_from_its_end() {
        let sub = approved_at(t0());
        let renewal_time = t0().add_days(25);

        let (start, end) = sub.next_period(renewal_time);

        assert_eq!(start, t0());
        assert_eq!(end, t0().add_days(60));
    }

    #[test]
    fn renewal_after_lapse_starts_from_now() {
        let sub = approved_at(t0());
        let late = t0().add_days(33);

        let (start, end) = sub.next_period(late);

        assert_eq!(start, late);
        assert_eq!(end, late.add_days(30));
    }

    #[test]
    fn approval_resets_failed_attempts() {
        let mut sub = approved_at(t0());
        sub.record_rejection("k2", t0()).unwrap();
        assert_eq!(sub.failed_charge_attempts(), 1);

        let (start, end) = sub.next_period(t0());
        sub.record_approval(payment("k3"), start, end, t0()).unwrap();
        assert_eq!(sub.failed_charge_attempts(), 0);
    }

    // Rejection

    #[test]
    fn rejection_from_trial_awaits_payment() {
        let mut sub = subscription(SubscriptionStatus::Trial);
        let attempts = sub.record_rejection("k1", t0()).unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(sub.status(), SubscriptionStatus::AwaitingPayment);
    }

    #[test]
    fn rejection_from_pending_keeps_status_and_counts() {
        let mut sub = subscription(SubscriptionStatus::Pending);
        assert_eq!(sub.record_rejection("k1", t0()).unwrap(), 1);
        assert_eq!(sub.record_rejection("k2", t0()).unwrap(), 2);
        assert_eq!(sub.status(), SubscriptionStatus::Pending);
    }

    #[test]
    fn rejected_charge_can_later_be_applied_as_approval() {
        let mut sub = subscription(SubscriptionStatus::Trial);
        sub.record_rejection("k1", t0()).unwrap();
        assert!(sub.has_applied_rejection("k1"));
        assert!(!sub.has_applied_approval("k1"));

        let (start, end) = sub.next_period(t0());
        sub.record_approval(payment("k1"), start, end, t0()).unwrap();
        assert!(sub.has_applied_approval("k1"));
        assert_eq!(sub.status(), SubscriptionStatus::Active);
    }

    #[test]
    fn rejection_from_terminal_status_fails() {
        let mut sub = in_status(SubscriptionStatus::Cancelled);
        assert!(sub.record_rejection("k1", t0()).is_err());
    }

    // Cancellation

    #[test]
    fn cancel_from_any_live_status_yields_cancelled() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trial,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::AwaitingPayment,
            SubscriptionStatus::Expired,
        ] {
            let mut sub = in_status(status);
            assert_eq!(sub.cancel(t0()), Ok(true));
            assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
            assert_eq!(sub.cancelled_at(), Some(t0()));
        }
    }

    #[test]
    fn cancel_twice_is_a_no_op() {
        let mut sub = subscription(SubscriptionStatus::Trial);
        sub.cancel(t0()).unwrap();
        let version = sub.version();

        assert_eq!(sub.cancel(t0().add_days(1)), Ok(false));
        assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
        assert_eq!(sub.version(), version);
        assert_eq!(sub.cancelled_at(), Some(t0()));
    }

    // Expiration

    #[test]
    fn expire_requires_grace_window_to_elapse() {
        let mut sub = approved_at(t0());
        let end = t0().add_days(30);

        assert_eq!(sub.expire(end.add_days(7)), Err(SubscriptionError::NotYetExpired));
        sub.expire(end.add_days(7).plus(Duration::seconds(1))).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Expired);
    }

    #[test]
    fn expire_rejects_trial() {
        let mut sub = subscription(SubscriptionStatus::Trial);
        assert!(matches!(
            sub.expire(t0().add_days(400)),
            Err(SubscriptionError::InvalidTransition { operation: "expire", .. })
        ));
    }

    // Suspension

    #[test]
    fn suspend_then_approval_reactivates() {
        let mut sub = approved_at(t0());
        sub.suspend(t0()).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Suspended);
        assert!(!sub.is_usable(t0()));

        let (start, end) = sub.next_period(t0());
        sub.record_approval(payment("k9"), start, end, t0()).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Active);
    }

    // Derived queries

    #[test]
    fn no_period_end_never_expires() {
        let sub = subscription(SubscriptionStatus::Trial);
        let far = t0().add_days(10_000);
        assert!(!sub.is_expired(far));
        assert!(!sub.in_grace_period(far));
        assert_eq!(sub.days_remaining(far), 0);
    }

    #[test]
    fn days_remaining_rounds_up_partial_days() {
        let sub = approved_at(t0());
        assert_eq!(sub.days_remaining(t0()), 30);
        assert_eq!(sub.days_remaining(t0().plus(Duration::hours(1))), 30);
        assert_eq!(sub.days_remaining(t0().add_days(29).plus(Duration::hours(23))), 1);
        assert_eq!(sub.days_remaining(t0().add_days(30)), 0);
        assert_eq!(sub.days_remaining(t0().add_days(45)), 0);
    }

    #[test]
    fn is_active_turns_false_once_expired() {
        let sub = approved_at(t0());
        let end = t0().add_days(30);
        assert!(sub.is_active(end.add_days(3)));
        assert!(!sub.is_active(end.add_days(8)));
    }

    #[test]
    fn grace_boundary_is_inside_grace_and_not_expired() {
        let sub = approved_at(t0());
        let deadline = t0().add_days(30).add_days(7);

        assert!(sub.in_grace_period(deadline));
        assert!(!sub.is_expired(deadline));
        assert!(sub.is_usable(deadline));

        let after = deadline.plus(Duration::seconds(1));
        assert!(!sub.in_grace_period(after));
        assert!(sub.is_expired(after));
        assert!(!sub.is_usable(after));
    }

    proptest! {
        #[test]
        fn grace_window_partitions_time(offset_secs in -86_400i64 * 10..86_400 * 20) {
            let sub = approved_at(t0());
            let end = t0().add_days(30);
            let now = end.plus(Duration::seconds(offset_secs));
            let grace_secs = 7 * 86_400;

            let expected_grace = offset_secs > 0 && offset_secs <= grace_secs;
            let expected_expired = offset_secs > grace_secs;

            prop_assert_eq!(sub.in_grace_period(now), expected_grace);
            prop_assert_eq!(sub.is_expired(now), expected_expired);
            prop_assert!(!(sub.in_grace_period(now) && sub.is_expired(now)));
        }
    }
}
