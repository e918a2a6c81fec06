//! Affiliate directory port.
//!
//! Read-only view of referral relationships owned by the back office.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, TenantId, UserId};

#[async_trait]
pub trait AffiliateDirectory: Send + Sync {
    /// The affiliate who referred `user_id`, if any.
    async fn find_referrer(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<UserId>, DomainError>;
}
