//! IdempotencyStore port - the charge-attempt log.
//!
//! Processors redeliver webhooks and callers retry timed-out charges, so
//! the same payment outcome can arrive several times. The store makes the
//! first arrival win:
//!
//! - `claim` is an atomic insert-if-absent keyed by idempotency key
//! - `complete` is a compare-and-set on the record status
//!
//! Implementations must make both operations atomic at the storage layer.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::payment::{IdempotencyKey, IdempotencyRecord, IdempotencyStatus};

/// Result of trying to claim a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The record was inserted; the caller owns the attempt.
    Claimed(IdempotencyRecord),
    /// A record already exists under this key.
    Existing(IdempotencyRecord),
}

/// Result of a compare-and-set completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied(IdempotencyRecord),
    /// Someone else moved the record first; carries the current record.
    Conflict(Option<IdempotencyRecord>),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Inserts `record` unless its key is already present.
    async fn claim(&self, record: IdempotencyRecord) -> Result<ClaimOutcome, DomainError>;

    /// Replaces the stored record with `record` if its status is still
    /// `expected_status`.
    async fn complete(
        &self,
        record: &IdempotencyRecord,
        expected_status: IdempotencyStatus,
    ) -> Result<CompletionOutcome, DomainError>;

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, DomainError>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<IdempotencyRecord>, DomainError>;

    /// Pending records last updated before `cutoff`.
    async fn find_pending_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<IdempotencyRecord>, DomainError>;

    /// Deletes an in-flight claim so the key can be retried.
    ///
    /// Settled or pending records are left untouched.
    async fn release(&self, key: &IdempotencyKey) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn IdempotencyStore) {}
}
