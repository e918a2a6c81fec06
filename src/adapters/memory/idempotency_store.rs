//! In-memory charge-attempt log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::payment::{IdempotencyKey, IdempotencyRecord, IdempotencyStatus};
use crate::ports::{ClaimOutcome, CompletionOutcome, IdempotencyStore};

/// `IdempotencyStore` backed by a mutex-guarded map.
///
/// Claim and complete each run under a single lock acquisition, which gives
/// the same atomicity as the unique key and conditional update in SQL.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<IdempotencyKey, IdempotencyRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, record: IdempotencyRecord) -> Result<ClaimOutcome, DomainError> {
        let mut records = self.records();
        if let Some(existing) = records.get(&record.key) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(ClaimOutcome::Claimed(record))
    }

    async fn complete(
        &self,
        record: &IdempotencyRecord,
        expected_status: IdempotencyStatus,
    ) -> Result<CompletionOutcome, DomainError> {
        let mut records = self.records();
        match records.get(&record.key) {
            Some(stored) if stored.status == expected_status => {
                records.insert(record.key.clone(), record.clone());
                Ok(CompletionOutcome::Applied(record.clone()))
            }
            current => Ok(CompletionOutcome::Conflict(current.cloned())),
        }
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        Ok(self.records().get(key).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        Ok(self
            .records()
            .values()
            .find(|r| r.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_pending_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let mut pending: Vec<IdempotencyRecord> = self
            .records()
            .values()
            .filter(|r| r.status == IdempotencyStatus::Pending && r.updated_at.is_before(&cutoff))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.updated_at);
        Ok(pending)
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), DomainError> {
        let mut records = self.records();
        if records
            .get(key)
            .is_some_and(|r| r.status == IdempotencyStatus::InFlight)
        {
            records.remove(key);
        }
        Ok(())
    }
}
