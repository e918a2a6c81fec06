//! PostgreSQL implementation of IdempotencyStore.
//!
//! `claim` relies on the primary key on `idempotency_key`
//! (`INSERT ... ON CONFLICT DO NOTHING`); `complete` is a conditional
//! `UPDATE ... WHERE status = $expected`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{database_error, parse_column};
use crate::domain::foundation::{DomainError, ErrorCode, Money, SubscriptionId, Timestamp};
use crate::domain::payment::{
    IdempotencyKey, IdempotencyRecord, IdempotencyStatus, PaymentFailure,
};
use crate::ports::{ClaimOutcome, CompletionOutcome, IdempotencyStore};

pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, DomainError> {
        let row: Option<IdempotencyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM idempotency_records WHERE idempotency_key = $1",
            SELECT_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to load idempotency record", e))?;

        row.map(IdempotencyRecord::try_from).transpose()
    }
}

const SELECT_COLUMNS: &str = r#"
    idempotency_key, subscription_id, status, external_id, amount_minor, currency,
    payment_method, failure_code, failure_message, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRow {
    idempotency_key: String,
    subscription_id: Uuid,
    status: String,
    external_id: Option<String>,
    amount_minor: i64,
    currency: String,
    payment_method: String,
    failure_code: Option<String>,
    failure_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IdempotencyRow> for IdempotencyRecord {
    type Error = DomainError;

    fn try_from(row: IdempotencyRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, detail: String| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid {} in idempotency_records row: {}", field, detail),
            )
        };

        Ok(IdempotencyRecord {
            key: IdempotencyKey::new(row.idempotency_key)
                .map_err(|e| corrupt("idempotency_key", e.to_string()))?,
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            status: parse_column("status", &row.status)?,
            external_id: row.external_id,
            amount: Money::new(row.amount_minor, &row.currency)
                .map_err(|e| corrupt("amount", e.to_string()))?,
            method: parse_column("payment_method", &row.payment_method)?,
            failure: row
                .failure_code
                .map(|code| PaymentFailure::new(code, row.failure_message.unwrap_or_default())),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn claim(&self, record: IdempotencyRecord) -> Result<ClaimOutcome, DomainError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                idempotency_key, subscription_id, status, external_id, amount_minor, currency,
                payment_method, failure_code, failure_message, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.key.as_str())
        .bind(record.subscription_id.as_uuid())
        .bind(record.status.as_str())
        .bind(&record.external_id)
        .bind(record.amount.amount_minor())
        .bind(record.amount.currency())
        .bind(record.method.as_str())
        .bind(record.failure.as_ref().map(|f| f.code.as_str()))
        .bind(record.failure.as_ref().map(|f| f.message.as_str()))
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to claim idempotency key", e))?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed(record));
        }

        match self.fetch(&record.key).await? {
            Some(existing) => Ok(ClaimOutcome::Existing(existing)),
            // Released between our insert and read; the caller may claim again.
            None => Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!("idempotency key {} changed during claim", record.key),
            )),
        }
    }

    async fn complete(
        &self,
        record: &IdempotencyRecord,
        expected_status: IdempotencyStatus,
    ) -> Result<CompletionOutcome, DomainError> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records SET
                status = $2,
                external_id = $3,
                amount_minor = $4,
                currency = $5,
                failure_code = $6,
                failure_message = $7,
                updated_at = $8
            WHERE idempotency_key = $1 AND status = $9
            "#,
        )
        .bind(record.key.as_str())
        .bind(record.status.as_str())
        .bind(&record.external_id)
        .bind(record.amount.amount_minor())
        .bind(record.amount.currency())
        .bind(record.failure.as_ref().map(|f| f.code.as_str()))
        .bind(record.failure.as_ref().map(|f| f.message.as_str()))
        .bind(record.updated_at.as_datetime())
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to complete idempotency record", e))?;

        if updated.rows_affected() == 1 {
            Ok(CompletionOutcome::Applied(record.clone()))
        } else {
            Ok(CompletionOutcome::Conflict(self.fetch(&record.key).await?))
        }
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        self.fetch(key).await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        let row: Option<IdempotencyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM idempotency_records WHERE external_id = $1 LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to load idempotency record", e))?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    async fn find_pending_older_than(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let rows: Vec<IdempotencyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM idempotency_records
            WHERE status = 'pending' AND updated_at < $1
            ORDER BY updated_at
            "#,
            SELECT_COLUMNS
        ))
        .bind(cutoff.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to query pending charges", e))?;

        rows.into_iter().map(IdempotencyRecord::try_from).collect()
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), DomainError> {
        sqlx::query(
            "DELETE FROM idempotency_records WHERE idempotency_key = $1 AND status = 'in_flight'",
        )
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to release idempotency key", e))?;

        Ok(())
    }
}
