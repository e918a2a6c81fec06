//! Subscription status state machine.
//!
//! Defines all possible subscription states and the transitions the
//! ledger may perform between them.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Free evaluation period; no charge has been made yet.
    Trial,

    /// Grace window after a first charge attempt that has not settled.
    Pending,

    /// Paid and current.
    Active,

    /// Administrative hold. No access until a payment lifts it.
    Suspended,

    /// Terminal. Ended on request.
    Cancelled,

    /// Terminal. Period and grace window both elapsed.
    Expired,

    /// A renewal charge was rejected; waiting for a successful retry.
    AwaitingPayment,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 7] = [
        SubscriptionStatus::Trial,
        SubscriptionStatus::Pending,
        SubscriptionStatus::Active,
        SubscriptionStatus::Suspended,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::Expired,
        SubscriptionStatus::AwaitingPayment,
    ];

    /// Returns the snake_case name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::AwaitingPayment => "awaiting_payment",
        }
    }

    /// Whether a rejected charge moves this status to `AwaitingPayment`.
    ///
    /// Pending, suspended and awaiting-payment subscriptions keep their
    /// status on rejection; only the attempt counter moves.
    pub fn rejection_moves_to_awaiting(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }

    /// Whether the expiration sweep may consider this status.
    pub fn can_expire(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::AwaitingPayment
        )
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From TRIAL
            (Trial, Active)
                | (Trial, AwaitingPayment)
                | (Trial, Suspended)
                | (Trial, Cancelled)
            // From PENDING
                | (Pending, Active)
                | (Pending, Suspended)
                | (Pending, Cancelled)
            // From ACTIVE
                | (Active, Active) // Renewal
                | (Active, AwaitingPayment)
                | (Active, Suspended)
                | (Active, Cancelled)
                | (Active, Expired)
            // From SUSPENDED
                | (Suspended, Active)
                | (Suspended, Cancelled)
            // From AWAITING_PAYMENT
                | (AwaitingPayment, Active)
                | (AwaitingPayment, Suspended)
                | (AwaitingPayment, Cancelled)
                | (AwaitingPayment, Expired)
            // From EXPIRED
                | (Expired, Cancelled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trial => vec![Active, AwaitingPayment, Suspended, Cancelled],
            Pending => vec![Active, Suspended, Cancelled],
            Active => vec![Active, AwaitingPayment, Suspended, Cancelled, Expired],
            Suspended => vec![Active, Cancelled],
            AwaitingPayment => vec![Active, Suspended, Cancelled, Expired],
            Expired => vec![Cancelled],
            Cancelled => vec![],
        }
    }

    /// Cancelled and expired are terminal even though an expired
    /// subscription may still be cancelled.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown subscription status '{}'", s))
    }
}
