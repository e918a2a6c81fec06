//! Read model handed to the presentation layer.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::foundation::{Money, PlanId, SubscriptionId, Timestamp};
use crate::domain::payment::PaymentMethod;
use crate::domain::subscription::{BillingInterval, PlanSummary, Subscription, SubscriptionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanView {
    pub id: PlanId,
    pub name: String,
    pub price: Money,
    pub interval: BillingInterval,
}

impl From<&PlanSummary> for PlanView {
    fn from(plan: &PlanSummary) -> Self {
        Self {
            id: plan.id,
            name: plan.name.clone(),
            price: plan.price.clone(),
            interval: plan.interval,
        }
    }
}

/// Subscription as seen by the back office UI.
///
/// Period dates are calendar dates (`YYYY-MM-DD`, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionView {
    pub id: SubscriptionId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub amount_paid: Money,
    pub payment_method: Option<PaymentMethod>,
    pub days_remaining: u32,
    pub in_grace_period: bool,
    pub is_usable: bool,
    pub plan: PlanView,
}

impl SubscriptionView {
    pub fn from_subscription(subscription: &Subscription, now: Timestamp) -> Self {
        Self {
            id: subscription.id(),
            plan_id: subscription.plan().id,
            status: subscription.status(),
            period_start: subscription.period_start().map(|t| t.date()),
            period_end: subscription.period_end().map(|t| t.date()),
            amount_paid: subscription.amount_paid().clone(),
            payment_method: subscription.payment_method(),
            days_remaining: subscription.days_remaining(now),
            in_grace_period: subscription.in_grace_period(now),
            is_usable: subscription.is_usable(now),
            plan: PlanView::from(subscription.plan()),
        }
    }
}
