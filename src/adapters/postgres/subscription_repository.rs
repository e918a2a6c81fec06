//! PostgreSQL implementation of SubscriptionRepository.
//!
//! The plan is stored denormalized on the row: a subscription keeps the
//! price and interval it was sold with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{database_error, parse_column};
use crate::domain::foundation::{
    DomainError, ErrorCode, Money, PlanId, SubscriptionId, TenantId, Timestamp, UserId,
};
use crate::domain::subscription::{
    PlanSummary, Subscription, SubscriptionSnapshot, SubscriptionStatus,
};
use crate::ports::{SubscriptionRepository, WriteOutcome};

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, user_id, tenant_id, plan_id, plan_name, plan_price_minor, plan_currency,
    plan_interval, status, period_start, period_end, grace_period_days,
    amount_paid_minor, payment_method, external_transaction_id,
    failed_charge_attempts, last_charge_marker, version, created_at, updated_at,
    cancelled_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: i64,
    tenant_id: Option<i64>,
    plan_id: i64,
    plan_name: String,
    plan_price_minor: i64,
    plan_currency: String,
    plan_interval: String,
    status: String,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    grace_period_days: i32,
    amount_paid_minor: i64,
    payment_method: Option<String>,
    external_transaction_id: Option<String>,
    failed_charge_attempts: i32,
    last_charge_marker: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} in subscriptions row: {}", field, detail),
    )
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let price = Money::new(row.plan_price_minor, &row.plan_currency)
            .map_err(|e| corrupt("plan_price", e))?;
        let amount_paid = Money::new(row.amount_paid_minor, &row.plan_currency)
            .map_err(|e| corrupt("amount_paid", e))?;

        let snapshot = SubscriptionSnapshot {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| corrupt("user_id", e))?,
            tenant_id: row
                .tenant_id
                .map(TenantId::new)
                .transpose()
                .map_err(|e| corrupt("tenant_id", e))?,
            plan: PlanSummary::new(
                PlanId::new(row.plan_id).map_err(|e| corrupt("plan_id", e))?,
                row.plan_name,
                price,
                parse_column("plan_interval", &row.plan_interval)?,
            ),
            status: parse_column("status", &row.status)?,
            period_start: row.period_start.map(Timestamp::from_datetime),
            period_end: row.period_end.map(Timestamp::from_datetime),
            grace_period_days: u32::try_from(row.grace_period_days)
                .map_err(|e| corrupt("grace_period_days", e))?,
            amount_paid,
            payment_method: row
                .payment_method
                .as_deref()
                .map(|m| parse_column("payment_method", m))
                .transpose()?,
            external_transaction_id: row.external_transaction_id,
            failed_charge_attempts: u32::try_from(row.failed_charge_attempts)
                .map_err(|e| corrupt("failed_charge_attempts", e))?,
            last_charge_marker: row.last_charge_marker,
            version: u64::try_from(row.version).map_err(|e| corrupt("version", e))?,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            cancelled_at: row.cancelled_at.map(Timestamp::from_datetime),
        };

        Ok(Subscription::from_snapshot(snapshot)?)
    }
}

fn to_i32(field: &str, value: u32) -> Result<i32, DomainError> {
    i32::try_from(value).map_err(|e| corrupt(field, e))
}

fn to_i64(field: &str, value: u64) -> Result<i64, DomainError> {
    i64::try_from(value).map_err(|e| corrupt(field, e))
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let s = subscription.to_snapshot();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, tenant_id, plan_id, plan_name, plan_price_minor, plan_currency,
                plan_interval, status, period_start, period_end, grace_period_days,
                amount_paid_minor, payment_method, external_transaction_id,
                failed_charge_attempts, last_charge_marker, version, created_at, updated_at,
                cancelled_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21
            )
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.user_id.value())
        .bind(s.tenant_id.map(|t| t.value()))
        .bind(s.plan.id.value())
        .bind(&s.plan.name)
        .bind(s.plan.price.amount_minor())
        .bind(s.plan.price.currency())
        .bind(s.plan.interval.as_str())
        .bind(s.status.as_str())
        .bind(s.period_start.map(|t| *t.as_datetime()))
        .bind(s.period_end.map(|t| *t.as_datetime()))
        .bind(to_i32("grace_period_days", s.grace_period_days)?)
        .bind(s.amount_paid.amount_minor())
        .bind(s.payment_method.map(|m| m.as_str()))
        .bind(&s.external_transaction_id)
        .bind(to_i32("failed_charge_attempts", s.failed_charge_attempts)?)
        .bind(&s.last_charge_marker)
        .bind(to_i64("version", s.version)?)
        .bind(s.created_at.as_datetime())
        .bind(s.updated_at.as_datetime())
        .bind(s.cancelled_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to insert subscription", e))?;

        Ok(())
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to load subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn update_if(
        &self,
        subscription: &Subscription,
        expected_status: SubscriptionStatus,
        expected_version: u64,
    ) -> Result<WriteOutcome, DomainError> {
        let s = subscription.to_snapshot();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                period_start = $3,
                period_end = $4,
                amount_paid_minor = $5,
                payment_method = $6,
                external_transaction_id = $7,
                failed_charge_attempts = $8,
                last_charge_marker = $9,
                version = $10,
                updated_at = $11,
                cancelled_at = $12
            WHERE id = $1 AND status = $13 AND version = $14
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.status.as_str())
        .bind(s.period_start.map(|t| *t.as_datetime()))
        .bind(s.period_end.map(|t| *t.as_datetime()))
        .bind(s.amount_paid.amount_minor())
        .bind(s.payment_method.map(|m| m.as_str()))
        .bind(&s.external_transaction_id)
        .bind(to_i32("failed_charge_attempts", s.failed_charge_attempts)?)
        .bind(&s.last_charge_marker)
        .bind(to_i64("version", s.version)?)
        .bind(s.updated_at.as_datetime())
        .bind(s.cancelled_at.map(|t| *t.as_datetime()))
        .bind(expected_status.as_str())
        .bind(to_i64("version", expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to update subscription", e))?;

        if result.rows_affected() == 1 {
            return Ok(WriteOutcome::Applied);
        }

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM subscriptions WHERE id = $1")
            .bind(s.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to load subscription", e))?;

        match exists {
            Some(_) => Ok(WriteOutcome::Conflict),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("subscription {} not found", s.id),
            )),
        }
    }

    async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status IN ('active', 'awaiting_payment')
              AND period_end IS NOT NULL
              AND period_end + make_interval(days => grace_period_days) < $1
            ORDER BY period_end
            "#,
            SELECT_COLUMNS
        ))
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to query overdue subscriptions", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }
}
