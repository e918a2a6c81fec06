//! Audit trail domain types.
//!
//! Append-only record of every billing state change, read by reporting
//! tooling. Entries are never updated or deleted by the core.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::domain::foundation::{AuditEntryId, RequestContext, TenantId, Timestamp, UserId};

/// Closed set of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    PaymentProcessed,
    CommissionGenerated,
    SubscriptionActivated,
    SubscriptionCancelled,
    CouponApplied,
    AffiliateReferred,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::PaymentProcessed => "payment_processed",
            AuditAction::CommissionGenerated => "commission_generated",
            AuditAction::SubscriptionActivated => "subscription_activated",
            AuditAction::SubscriptionCancelled => "subscription_cancelled",
            AuditAction::CouponApplied => "coupon_applied",
            AuditAction::AffiliateReferred => "affiliate_referred",
        }
    }

    /// Money-moving and access-granting actions get elevated logging.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AuditAction::PaymentProcessed
                | AuditAction::CommissionGenerated
                | AuditAction::SubscriptionActivated
                | AuditAction::SubscriptionCancelled
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AuditAction::Created,
            AuditAction::Updated,
            AuditAction::Deleted,
            AuditAction::StatusChanged,
            AuditAction::PaymentProcessed,
            AuditAction::CommissionGenerated,
            AuditAction::SubscriptionActivated,
            AuditAction::SubscriptionCancelled,
            AuditAction::CouponApplied,
            AuditAction::AffiliateReferred,
        ]
        .into_iter()
        .find(|action| action.as_str() == s)
        .ok_or_else(|| format!("unknown audit action '{}'", s))
    }
}

/// One immutable audit record.
///
/// Field names match the persisted record shape
/// `{id, action, model_type, model_id, user_id, tenant_id, old_values,
/// new_values, description, ip_address, user_agent, created_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub action: AuditAction,
    pub model_type: String,
    pub model_id: String,
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: Timestamp,
}

impl AuditLogEntry {
    /// Starts an entry for `model_type`/`model_id`, attributing it to the
    /// actor and tenant in `ctx`.
    pub fn new(
        action: AuditAction,
        model_type: impl Into<String>,
        model_id: impl ToString,
        ctx: &RequestContext,
        now: Timestamp,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            action,
            model_type: model_type.into(),
            model_id: model_id.to_string(),
            user_id: ctx.actor_user_id,
            tenant_id: ctx.tenant_id,
            old_values: None,
            new_values: None,
            description: String::new(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            created_at: now,
        }
    }

    pub fn with_old_values(mut self, values: JsonValue) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new_values(mut self, values: JsonValue) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Fallback attribution when the request carried no actor.
    pub fn attributed_to(mut self, user_id: UserId, tenant_id: Option<TenantId>) -> Self {
        if self.user_id.is_none() {
            self.user_id = Some(user_id);
        }
        if self.tenant_id.is_none() {
            self.tenant_id = tenant_id;
        }
        self
    }

    pub fn is_critical(&self) -> bool {
        self.action.is_critical()
    }
}
