//! PostgreSQL implementation of AuditLogRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{database_error, parse_column};
use crate::domain::audit::AuditLogEntry;
use crate::domain::foundation::{AuditEntryId, DomainError, ErrorCode, TenantId, Timestamp, UserId};
use crate::ports::AuditLogRepository;

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditLogRow {
    id: Uuid,
    action: String,
    model_type: String,
    model_id: String,
    user_id: Option<i64>,
    tenant_id: Option<i64>,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    description: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditLogRow> for AuditLogEntry {
    type Error = DomainError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, detail: String| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid {} in audit_logs row: {}", field, detail),
            )
        };

        Ok(AuditLogEntry {
            id: AuditEntryId::from_uuid(row.id),
            action: parse_column("action", &row.action)?,
            model_type: row.model_type,
            model_id: row.model_id,
            user_id: row
                .user_id
                .map(UserId::new)
                .transpose()
                .map_err(|e| corrupt("user_id", e.to_string()))?,
            tenant_id: row
                .tenant_id
                .map(TenantId::new)
                .transpose()
                .map_err(|e| corrupt("tenant_id", e.to_string()))?,
            old_values: row.old_values,
            new_values: row.new_values,
            description: row.description,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, model_type, model_id, user_id, tenant_id, old_values,
                new_values, description, ip_address, user_agent, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.action.as_str())
        .bind(&entry.model_type)
        .bind(&entry.model_id)
        .bind(entry.user_id.map(|u| u.value()))
        .bind(entry.tenant_id.map(|t| t.value()))
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.description)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to append audit entry", e))?;

        Ok(())
    }

    async fn find_by_model(
        &self,
        model_type: &str,
        model_id: &str,
    ) -> Result<Vec<AuditLogEntry>, DomainError> {
        let rows: Vec<AuditLogRow> = sqlx::query_as(
            r#"
            SELECT id, action, model_type, model_id, user_id, tenant_id, old_values,
                   new_values, description, ip_address, user_agent, created_at
            FROM audit_logs
            WHERE model_type = $1 AND model_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(model_type)
        .bind(model_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to query audit entries", e))?;

        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }
}
