//! Subscription repository port.
//!
//! Persists Subscription aggregates. Every update is conditional on the
//! status and version the writer loaded, so two concurrent writers for the
//! same subscription converge: exactly one wins, the other sees `Conflict`.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp};
use crate::domain::subscription::{Subscription, SubscriptionStatus};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Stored row no longer matched the expected status/version.
    Conflict,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Inserts a new subscription.
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// Writes `subscription` only if the stored row still has
    /// `expected_status` and `expected_version`.
    async fn update_if(
        &self,
        subscription: &Subscription,
        expected_status: SubscriptionStatus,
        expected_version: u64,
    ) -> Result<WriteOutcome, DomainError>;

    /// Active or awaiting-payment subscriptions whose period and grace
    /// window ended before `now`.
    async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError>;
}
