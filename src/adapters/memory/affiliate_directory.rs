//! In-memory referral directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::foundation::{DomainError, TenantId, UserId};
use crate::ports::AffiliateDirectory;

/// Referrals keyed by `(referred user, tenant)`.
#[derive(Default)]
pub struct InMemoryAffiliateDirectory {
    referrals: RwLock<HashMap<(UserId, Option<TenantId>), UserId>>,
}

impl InMemoryAffiliateDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `affiliate` referred `user` within `tenant`.
    pub fn add_referral(&self, user: UserId, tenant: Option<TenantId>, affiliate: UserId) {
        self.referrals
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((user, tenant), affiliate);
    }
}

#[async_trait]
impl AffiliateDirectory for InMemoryAffiliateDirectory {
    async fn find_referrer(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<UserId>, DomainError> {
        Ok(self
            .referrals
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(user_id, tenant_id))
            .copied())
    }
}
