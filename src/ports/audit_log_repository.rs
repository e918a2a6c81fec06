//! Audit log repository port.
//!
//! Append-only: there is no update or delete.

use async_trait::async_trait;

use crate::domain::audit::AuditLogEntry;
use crate::domain::foundation::DomainError;

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError>;

    /// Entries for one subject, oldest first.
    async fn find_by_model(
        &self,
        model_type: &str,
        model_id: &str,
    ) -> Result<Vec<AuditLogEntry>, DomainError>;
}
