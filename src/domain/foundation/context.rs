//! Explicit request context carried into every billing operation.

use serde::{Deserialize, Serialize};

use super::{TenantId, UserId};

/// Who is acting, for which tenant, and from where.
///
/// Built once at the edge (HTTP handler, scheduler) and passed down; nothing
/// in the billing core resolves tenant or actor from ambient state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Option<TenantId>,
    pub actor_user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    /// Context for work started by the system itself (sweeps, webhooks).
    pub fn system() -> Self {
        Self::default()
    }

    /// Context for a user acting inside a tenant.
    pub fn for_user(tenant_id: Option<TenantId>, user_id: UserId) -> Self {
        Self {
            tenant_id,
            actor_user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
