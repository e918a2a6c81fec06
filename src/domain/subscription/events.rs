//! Billing domain events.
//!
//! Facts published after a subscription or payment changed. Consumers
//! (commission generation, notifications) react to them outside the
//! transactional core and never mutate the originating subscription.
//!
//! # Event Naming Convention
//!
//! Events are named in past tense: `PaymentProcessed`, not `ProcessPayment`.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    DomainEvent, EventId, Money, PlanId, SubscriptionId, TenantId, Timestamp, UserId,
};
use crate::domain::payment::{PaymentMethod, RejectionReason};

use super::SubscriptionStatus;

/// Routing keys for `BillingEvent` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BillingEventKind {
    SubscriptionCreated,
    PaymentProcessed,
    PaymentRejected,
    CommissionGenerated,
}

impl BillingEventKind {
    /// Event type string used for bus subscriptions and envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventKind::SubscriptionCreated => "subscription.created.v1",
            BillingEventKind::PaymentProcessed => "payment.processed.v1",
            BillingEventKind::PaymentRejected => "payment.rejected.v1",
            BillingEventKind::CommissionGenerated => "commission.generated.v1",
        }
    }
}

/// Events emitted by the billing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    /// A subscription was opened in trial or pending.
    SubscriptionCreated {
        event_id: EventId,
        subscription_id: SubscriptionId,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        plan_id: PlanId,
        status: SubscriptionStatus,
        occurred_at: Timestamp,
    },

    /// A charge was approved and the subscription activated or renewed.
    PaymentProcessed {
        event_id: EventId,
        subscription_id: SubscriptionId,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        amount: Money,
        payment_method: PaymentMethod,
        external_id: String,
        period_end: Timestamp,
        occurred_at: Timestamp,
    },

    /// A charge was rejected or failed.
    ///
    /// `attempt_count` is the number of consecutive failed charges.
    PaymentRejected {
        event_id: EventId,
        subscription_id: SubscriptionId,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        reason: RejectionReason,
        attempt_count: u32,
        occurred_at: Timestamp,
    },

    /// An affiliate earned a commission on a processed payment.
    CommissionGenerated {
        event_id: EventId,
        subscription_id: SubscriptionId,
        affiliate_user_id: UserId,
        referred_user_id: UserId,
        base_amount: Money,
        commission: Money,
        rate_bps: u32,
        occurred_at: Timestamp,
    },
}

impl BillingEvent {
    pub fn kind(&self) -> BillingEventKind {
        match self {
            BillingEvent::SubscriptionCreated { .. } => BillingEventKind::SubscriptionCreated,
            BillingEvent::PaymentProcessed { .. } => BillingEventKind::PaymentProcessed,
            BillingEvent::PaymentRejected { .. } => BillingEventKind::PaymentRejected,
            BillingEvent::CommissionGenerated { .. } => BillingEventKind::CommissionGenerated,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            BillingEvent::SubscriptionCreated { subscription_id, .. }
            | BillingEvent::PaymentProcessed { subscription_id, .. }
            | BillingEvent::PaymentRejected { subscription_id, .. }
            | BillingEvent::CommissionGenerated { subscription_id, .. } => *subscription_id,
        }
    }
}

impl DomainEvent for BillingEvent {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn aggregate_id(&self) -> String {
        self.subscription_id().to_string()
    }

    fn aggregate_type(&self) -> &'static str {
        "Subscription"
    }

    fn occurred_at(&self) -> Timestamp {
        match self {
            BillingEvent::SubscriptionCreated { occurred_at, .. }
            | BillingEvent::PaymentProcessed { occurred_at, .. }
            | BillingEvent::PaymentRejected { occurred_at, .. }
            | BillingEvent::CommissionGenerated { occurred_at, .. } => *occurred_at,
        }
    }

    fn event_id(&self) -> EventId {
        match self {
            BillingEvent::SubscriptionCreated { event_id, .. }
            | BillingEvent::PaymentProcessed { event_id, .. }
            | BillingEvent::PaymentRejected { event_id, .. }
            | BillingEvent::CommissionGenerated { event_id, .. } => event_id.clone(),
        }
    }
}
