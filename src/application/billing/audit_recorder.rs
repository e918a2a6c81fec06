//! Audit recorder - persists audit entries and flags critical ones.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::audit::AuditLogEntry;
use crate::domain::foundation::{AuditEntryId, DomainError, ErrorCode};
use crate::ports::AuditLogRepository;

/// An audit entry could not be persisted.
///
/// Callers must surface this; a billing change without its audit trail is
/// not allowed to pass silently.
#[derive(Debug, Error)]
#[error("failed to persist audit entry {entry_id}: {source}")]
pub struct AuditError {
    pub entry_id: AuditEntryId,
    #[source]
    pub source: DomainError,
}

impl From<AuditError> for DomainError {
    fn from(err: AuditError) -> Self {
        DomainError::new(ErrorCode::AuditFailure, err.to_string())
            .with_detail("entry_id", err.entry_id.to_string())
    }
}

/// Appends entries to the audit log.
pub struct AuditRecorder {
    repository: Arc<dyn AuditLogRepository>,
}

impl AuditRecorder {
    pub fn new(repository: Arc<dyn AuditLogRepository>) -> Self {
        Self { repository }
    }

    /// Persists `entry`.
    ///
    /// Critical actions additionally log at `warn` on the `audit.critical`
    /// target. On failure the full entry is logged so it can be replayed.
    pub async fn record(&self, entry: AuditLogEntry) -> Result<AuditLogEntry, AuditError> {
        match self.repository.append(&entry).await {
            Ok(()) => {
                if entry.is_critical() {
                    warn!(
                        target: "audit.critical",
                        action = %entry.action,
                        model_type = %entry.model_type,
                        model_id = %entry.model_id,
                        user_id = ?entry.user_id.map(|id| id.value()),
                        tenant_id = ?entry.tenant_id.map(|id| id.value()),
                        description = %entry.description,
                        "critical billing operation recorded"
                    );
                } else {
                    debug!(
                        action = %entry.action,
                        model_type = %entry.model_type,
                        model_id = %entry.model_id,
                        "audit entry recorded"
                    );
                }
                Ok(entry)
            }
            Err(source) => {
                let serialized = serde_json::to_string(&entry)
                    .unwrap_or_else(|_| format!("{:?}", entry));
                error!(
                    target: "audit",
                    entry_id = %entry.id,
                    action = %entry.action,
                    entry = %serialized,
                    error = %source,
                    "audit entry could not be persisted"
                );
                Err(AuditError {
                    entry_id: entry.id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditAction;
    use crate::domain::foundation::{RequestContext, Timestamp};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockAuditLog {
        entries: Mutex<Vec<AuditLogEntry>>,
        fail: bool,
    }

    impl MockAuditLog {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl AuditLogRepository for MockAuditLog {
        async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError> {
            if self.fail {
                return Err(DomainError::new(ErrorCode::DatabaseError, "disk full"));
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn find_by_model(
            &self,
            model_type: &str,
            model_id: &str,
        ) -> Result<Vec<AuditLogEntry>, DomainError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.model_type == model_type && e.model_id == model_id)
                .cloned()
                .collect())
        }
    }

    fn entry(action: AuditAction) -> AuditLogEntry {
        AuditLogEntry::new(
            action,
            "Subscription",
            "sub-1",
            &RequestContext::system(),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn record_appends_entry() {
        let log = Arc::new(MockAuditLog::new());
        let recorder = AuditRecorder::new(log.clone());

        let recorded = recorder.record(entry(AuditAction::PaymentProcessed)).await.unwrap();

        let stored = log.find_by_model("Subscription", "sub-1").await.unwrap();
        assert_eq!(stored, vec![recorded]);
    }

    #[tokio::test]
    async fn persistence_failure_is_escalated() {
        let recorder = AuditRecorder::new(Arc::new(MockAuditLog::failing()));
        let entry = entry(AuditAction::StatusChanged);
        let entry_id = entry.id;

        let err = recorder.record(entry).await.unwrap_err();

        assert_eq!(err.entry_id, entry_id);
        assert_eq!(err.source.code, ErrorCode::DatabaseError);
        let domain: DomainError = err.into();
        assert_eq!(domain.code, ErrorCode::AuditFailure);
    }
}
