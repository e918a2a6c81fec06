//! In-memory audit trail.

use async_trait::async_trait;
use std::sync::RwLock;

use crate::domain::audit::AuditLogEntry;
use crate::domain::foundation::DomainError;
use crate::ports::AuditLogRepository;

/// Append-only audit log kept in a `Vec`, in insertion order.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLog {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }

    async fn find_by_model(
        &self,
        model_type: &str,
        model_id: &str,
    ) -> Result<Vec<AuditLogEntry>, DomainError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.model_type == model_type && e.model_id == model_id)
            .cloned()
            .collect())
    }
}
