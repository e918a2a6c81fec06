//! PostgreSQL implementation of AffiliateDirectory.

use async_trait::async_trait;
use sqlx::PgPool;

use super::database_error;
use crate::domain::foundation::{DomainError, ErrorCode, TenantId, UserId};
use crate::ports::AffiliateDirectory;

pub struct PostgresAffiliateDirectory {
    pool: PgPool,
}

impl PostgresAffiliateDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AffiliateDirectory for PostgresAffiliateDirectory {
    async fn find_referrer(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<UserId>, DomainError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT affiliate_user_id FROM affiliate_referrals
            WHERE referred_user_id = $1 AND tenant_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(user_id.value())
        .bind(tenant_id.map(|t| t.value()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to look up referrer", e))?;

        row.map(|(affiliate,)| {
            UserId::new(affiliate).map_err(|e| {
                DomainError::new(
                    ErrorCode::DatabaseError,
                    format!("Invalid affiliate_user_id: {}", e),
                )
            })
        })
        .transpose()
    }
}
