//! PostgreSQL adapters - Database implementations for the persistence ports.
//!
//! - `PostgresSubscriptionRepository` - Subscriptions with conditional updates
//! - `PostgresIdempotencyStore` - Charge-attempt log
//! - `PostgresAuditLogRepository` - Append-only audit trail
//! - `PostgresAffiliateDirectory` - Referral lookups
//!
//! Queries are checked at runtime; the schema lives in `migrations/`.

mod affiliate_directory;
mod audit_log_repository;
mod idempotency_store;
mod subscription_repository;

pub use affiliate_directory::PostgresAffiliateDirectory;
pub use audit_log_repository::PostgresAuditLogRepository;
pub use idempotency_store::PostgresIdempotencyStore;
pub use subscription_repository::PostgresSubscriptionRepository;

use std::fmt::Display;
use std::str::FromStr;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Runs the embedded migrations against `pool`.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), DomainError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DomainError::new(ErrorCode::DatabaseError, format!("Migration failed: {}", e)))
}

pub(crate) fn database_error(context: &str, err: sqlx::Error) -> DomainError {
    tracing::error!(error = %err, "{}", context);
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, err))
}

/// Parses a text column stored with the type's `as_str` form.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, DomainError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value '{}': {}", column, value, e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionStatus;

    #[test]
    fn parse_column_reads_stored_names() {
        let status: SubscriptionStatus = parse_column("status", "awaiting_payment").unwrap();
        assert_eq!(status, SubscriptionStatus::AwaitingPayment);
    }

    #[test]
    fn parse_column_reports_bad_values() {
        let err = parse_column::<SubscriptionStatus>("status", "zombie").unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(err.message.contains("zombie"));
    }
}
