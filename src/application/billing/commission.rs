//! Commission generator - pays referrers a share of processed payments.
//!
//! Runs as an event handler on `payment.processed.v1`. Its failures are
//! contained by the event bus and never affect the payment that triggered it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::AuditRecorder;
use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::foundation::{
    DomainError, ErrorCode, EventEnvelope, EventId, RequestContext, SerializableDomainEvent,
};
use crate::domain::subscription::{BillingEvent, BillingEventKind};
use crate::ports::{AffiliateDirectory, Clock, EventHandler, EventPublisher};

pub struct CommissionGenerator {
    directory: Arc<dyn AffiliateDirectory>,
    audit: Arc<AuditRecorder>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    rate_bps: u32,
}

impl CommissionGenerator {
    /// `rate_bps` is the commission rate in basis points (1000 = 10%).
    pub fn new(
        directory: Arc<dyn AffiliateDirectory>,
        audit: Arc<AuditRecorder>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        rate_bps: u32,
    ) -> Self {
        Self {
            directory,
            audit,
            events,
            clock,
            rate_bps,
        }
    }

    /// Event types this handler should be registered for.
    pub fn event_types() -> [&'static str; 1] {
        [BillingEventKind::PaymentProcessed.as_str()]
    }
}

#[async_trait]
impl EventHandler for CommissionGenerator {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), DomainError> {
        let event: BillingEvent = envelope.payload_as().map_err(|e| {
            DomainError::new(ErrorCode::InternalError, format!("invalid event payload: {}", e))
        })?;

        let BillingEvent::PaymentProcessed {
            subscription_id,
            user_id,
            tenant_id,
            amount,
            ..
        } = event
        else {
            return Ok(());
        };

        let Some(affiliate_user_id) = self.directory.find_referrer(user_id, tenant_id).await? else {
            debug!(subscription_id = %subscription_id, "no referrer, no commission");
            return Ok(());
        };
        if affiliate_user_id == user_id {
            debug!(subscription_id = %subscription_id, "self-referral ignored");
            return Ok(());
        }

        let commission = amount.percentage_bps(self.rate_bps).map_err(|e| {
            DomainError::new(ErrorCode::InternalError, format!("commission overflow: {}", e))
        })?;
        if commission.is_zero() {
            return Ok(());
        }

        let now = self.clock.now();
        let ctx = RequestContext {
            tenant_id,
            correlation_id: envelope.metadata.correlation_id.clone(),
            ..RequestContext::system()
        };

        self.audit
            .record(
                AuditLogEntry::new(
                    AuditAction::CommissionGenerated,
                    "Subscription",
                    subscription_id,
                    &ctx,
                    now,
                )
                .attributed_to(affiliate_user_id, tenant_id)
                .with_new_values(json!({
                    "affiliate_user_id": affiliate_user_id,
                    "referred_user_id": user_id,
                    "base_amount": amount,
                    "commission": commission,
                    "rate_bps": self.rate_bps,
                    "source_event_id": envelope.event_id.as_str(),
                }))
                .with_description(format!(
                    "commission of {} for affiliate {}",
                    commission,
                    affiliate_user_id.value()
                )),
            )
            .await?;

        let generated = BillingEvent::CommissionGenerated {
            event_id: EventId::new(),
            subscription_id,
            affiliate_user_id,
            referred_user_id: user_id,
            base_amount: amount,
            commission: commission.clone(),
            rate_bps: self.rate_bps,
            occurred_at: now,
        };
        let mut outgoing = generated
            .to_envelope()
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?
            .with_causation_id(envelope.event_id.as_str());
        if let Some(correlation_id) = envelope.metadata.correlation_id {
            outgoing = outgoing.with_correlation_id(correlation_id);
        }
        self.events.publish(outgoing).await?;

        info!(
            subscription_id = %subscription_id,
            affiliate_user_id = affiliate_user_id.value(),
            commission = %commission,
            "commission generated"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CommissionGenerator"
    }
}
