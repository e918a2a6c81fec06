//! In-memory subscription repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{SubscriptionRepository, WriteOutcome};

/// Subscription store backed by a `HashMap`.
///
/// The write lock makes `update_if` an atomic compare-and-set, matching the
/// conditional `UPDATE ... WHERE status = $ AND version = $` of the
/// PostgreSQL adapter.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut rows = self
            .rows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if rows.contains_key(&subscription.id()) {
            return Err(DomainError::new(
                ErrorCode::DatabaseError,
                format!("subscription {} already exists", subscription.id()),
            ));
        }
        rows.insert(subscription.id(), subscription.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned())
    }

    async fn update_if(
        &self,
        subscription: &Subscription,
        expected_status: SubscriptionStatus,
        expected_version: u64,
    ) -> Result<WriteOutcome, DomainError> {
        let mut rows = self
            .rows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match rows.get(&subscription.id()) {
            Some(stored)
                if stored.status() == expected_status && stored.version() == expected_version =>
            {
                rows.insert(subscription.id(), subscription.clone());
                Ok(WriteOutcome::Applied)
            }
            Some(_) => Ok(WriteOutcome::Conflict),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("subscription {} not found", subscription.id()),
            )),
        }
    }

    async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        let rows = self
            .rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut overdue: Vec<Subscription> = rows
            .values()
            .filter(|s| s.status().can_expire() && s.is_expired(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|s| s.period_end());
        Ok(overdue)
    }
}
