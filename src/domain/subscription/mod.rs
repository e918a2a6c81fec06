//! Subscription domain module.
//!
//! Handles the subscription lifecycle: trial, activation, renewal,
//! rejection, suspension, cancellation and expiration with a grace window.
//!
//! # Module Structure
//!
//! - `aggregate` - Subscription aggregate entity
//! - `status` - SubscriptionStatus state machine
//! - `plan` - Plan snapshot and billing interval
//! - `errors` - SubscriptionError
//! - `events` - BillingEvent tagged union

mod aggregate;
mod errors;
mod events;
mod plan;
mod status;

pub use aggregate::{
    AppliedPayment, Subscription, SubscriptionSnapshot, DEFAULT_GRACE_PERIOD_DAYS,
};
pub use errors::SubscriptionError;
pub use events::{BillingEvent, BillingEventKind};
pub use plan::{BillingInterval, PlanSummary};
pub use status::SubscriptionStatus;
