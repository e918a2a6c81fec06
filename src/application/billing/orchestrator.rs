//! Payment orchestrator - drives charges and webhook reconciliation.
//!
//! Flow for a charge:
//!
//! 1. Claim the idempotency key for (subscription, billing period)
//! 2. Call the gateway through the retry executor
//! 3. Settle the idempotency record by compare-and-set
//! 4. Apply the outcome to the ledger, audit it, publish the event
//!
//! Webhooks join the same flow at step 3, after signature verification.
//! Whoever settles the record first wins; every later caller observes the
//! stored outcome and changes nothing.

use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, warn};

use super::{
    AuditRecorder, ChargeError, LedgerError, LedgerOutcome, OpenSubscription, ReconcileError,
    RetryExecutor, SubscriptionLedger, SubscriptionView,
};
use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::foundation::{
    DomainError, EventEnvelope, EventId, RequestContext, SerializableDomainEvent, StateMachine,
    SubscriptionId, Timestamp, ValidationError,
};
use crate::domain::payment::{
    BillingPeriod, IdempotencyKey, IdempotencyRecord, IdempotencyStatus, PaymentFailure,
    PaymentRequest, PaymentResult, PaymentStatus, RejectionReason,
};
use crate::domain::subscription::{
    AppliedPayment, BillingEvent, Subscription, SubscriptionError, SubscriptionStatus,
};
use crate::ports::{
    ClaimOutcome, Clock, CompletionOutcome, EventPublisher, IdempotencyStore, PaymentErrorCode,
    PaymentGateway,
};

const SUBSCRIPTION_MODEL: &str = "Subscription";

/// Charge one billing cycle of a subscription.
#[derive(Debug, Clone)]
pub struct ChargeCommand {
    pub subscription_id: SubscriptionId,
    pub request: PaymentRequest,
    /// Caller-supplied key; overrides the billing-period key.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Cycle being charged; defaults to the current calendar month.
    pub billing_period: Option<BillingPeriod>,
}

impl ChargeCommand {
    pub fn new(subscription_id: SubscriptionId, request: PaymentRequest) -> Self {
        Self {
            subscription_id,
            request,
            idempotency_key: None,
            billing_period: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn for_period(mut self, period: BillingPeriod) -> Self {
        self.billing_period = Some(period);
        self
    }
}

/// Result of a charge attempt as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Approved and applied; the subscription is active.
    Approved {
        result: PaymentResult,
        subscription: Subscription,
    },
    /// Rejected or failed and applied.
    Rejected {
        result: PaymentResult,
        reason: RejectionReason,
        attempt_count: u32,
    },
    /// Accepted by the processor but not settled; the ledger is untouched.
    Pending { result: PaymentResult },
    /// Settled after the subscription became terminal; audited only.
    Unapplied {
        result: PaymentResult,
        status: SubscriptionStatus,
    },
    /// The key was settled before; the stored result is returned.
    Duplicate { result: PaymentResult },
    /// Another attempt holds the key and has not finished.
    InProgress { key: IdempotencyKey },
}

impl ChargeOutcome {
    pub fn result(&self) -> Option<&PaymentResult> {
        match self {
            ChargeOutcome::Approved { result, .. }
            | ChargeOutcome::Rejected { result, .. }
            | ChargeOutcome::Pending { result }
            | ChargeOutcome::Unapplied { result, .. }
            | ChargeOutcome::Duplicate { result } => Some(result),
            ChargeOutcome::InProgress { .. } => None,
        }
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.result().map(|result| result.status)
    }
}

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(ChargeOutcome),
    /// This transaction already reached the reported status (or a later one).
    AlreadyReconciled { external_id: String },
    /// No charge attempt matches; the webhook belongs to someone else.
    UnknownSubject { external_id: String },
    /// Valid but irrelevant delivery, such as an unsupported event type.
    Ignored { reason: String },
}

/// Counters from one pending-timeout sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    /// The processor reported a final status.
    pub settled: usize,
    /// Still unconfirmed; failed with `pending_timeout`.
    pub timed_out: usize,
    pub errors: usize,
}

pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<SubscriptionLedger>,
    idempotency: Arc<dyn IdempotencyStore>,
    audit: Arc<AuditRecorder>,
    events: Arc<dyn EventPublisher>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<SubscriptionLedger>,
        idempotency: Arc<dyn IdempotencyStore>,
        audit: Arc<AuditRecorder>,
        events: Arc<dyn EventPublisher>,
        retry: RetryExecutor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            idempotency,
            audit,
            events,
            retry,
            clock,
        }
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    // ------------------------------------------------------------------
    // Subscription lifecycle
    // ------------------------------------------------------------------

    pub async fn open_subscription(
        &self,
        ctx: &RequestContext,
        command: OpenSubscription,
    ) -> Result<Subscription, ChargeError> {
        let now = self.clock.now();
        let subscription = self.ledger.open(command, now).await?;

        self.audit
            .record(
                AuditLogEntry::new(AuditAction::Created, SUBSCRIPTION_MODEL, subscription.id(), ctx, now)
                    .attributed_to(subscription.user_id(), subscription.tenant_id())
                    .with_new_values(ledger_values(&subscription))
                    .with_description(format!(
                        "subscription opened on plan '{}'",
                        subscription.plan().name
                    )),
            )
            .await?;

        self.publish(
            ctx,
            BillingEvent::SubscriptionCreated {
                event_id: EventId::new(),
                subscription_id: subscription.id(),
                user_id: subscription.user_id(),
                tenant_id: subscription.tenant_id(),
                plan_id: subscription.plan().id,
                status: subscription.status(),
                occurred_at: now,
            },
        )
        .await;

        Ok(subscription)
    }

    pub async fn view(&self, id: SubscriptionId) -> Result<SubscriptionView, ChargeError> {
        let subscription = self.ledger.get(id).await?;
        Ok(SubscriptionView::from_subscription(&subscription, self.clock.now()))
    }

    /// Cancels a subscription. Cancelling twice is a no-op.
    pub async fn cancel_subscription(
        &self,
        ctx: &RequestContext,
        id: SubscriptionId,
    ) -> Result<Subscription, ChargeError> {
        let now = self.clock.now();
        match self.ledger.cancel(id, now).await? {
            LedgerOutcome::Applied { before, after } => {
                self.audit
                    .record(
                        AuditLogEntry::new(AuditAction::SubscriptionCancelled, SUBSCRIPTION_MODEL, id, ctx, now)
                            .attributed_to(after.user_id(), after.tenant_id())
                            .with_old_values(ledger_values(&before))
                            .with_new_values(ledger_values(&after))
                            .with_description(format!("subscription cancelled from '{}'", before.status())),
                    )
                    .await?;
                Ok(after)
            }
            LedgerOutcome::Unchanged(subscription) => Ok(subscription),
        }
    }

    /// Puts a subscription on administrative hold.
    pub async fn suspend_subscription(
        &self,
        ctx: &RequestContext,
        id: SubscriptionId,
    ) -> Result<Subscription, ChargeError> {
        let now = self.clock.now();
        let outcome = self.ledger.suspend(id, now).await?;
        if let LedgerOutcome::Applied { before, after } = &outcome {
            self.audit_status_change(ctx, before, after, now, "subscription suspended")
                .await?;
        }
        Ok(outcome.subscription().clone())
    }

    // ------------------------------------------------------------------
    // Charging
    // ------------------------------------------------------------------

    /// Charges a subscription for one billing cycle.
    ///
    /// Repeating the call for the same cycle (or the same explicit key)
    /// never produces a second real charge. After a decline the default key
    /// moves on with the attempt count, so a plain retry charges again.
    pub async fn charge(
        &self,
        ctx: &RequestContext,
        command: ChargeCommand,
    ) -> Result<ChargeOutcome, ChargeError> {
        let now = self.clock.now();
        let subscription = self.ledger.get(command.subscription_id).await?;

        if subscription.status().is_terminal() {
            return Err(LedgerError::from(SubscriptionError::invalid_transition(
                subscription.status(),
                "charge",
            ))
            .into());
        }
        let plan_currency = subscription.plan().price.currency();
        if command.request.amount().currency() != plan_currency {
            return Err(ValidationError::invalid_format(
                "amount",
                format!("currency must match the plan currency {}", plan_currency),
            )
            .into());
        }

        let key = command.idempotency_key.clone().unwrap_or_else(|| {
            IdempotencyKey::for_charge_attempt(
                subscription.id(),
                command
                    .billing_period
                    .unwrap_or_else(|| BillingPeriod::current(now)),
                subscription.failed_charge_attempts(),
            )
        });

        let claim = IdempotencyRecord::claim(
            key.clone(),
            subscription.id(),
            command.request.amount().clone(),
            command.request.method(),
            now,
        );
        let record = match self.idempotency.claim(claim).await? {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::Existing(existing) => {
                if existing.subscription_id != subscription.id() {
                    return Err(ValidationError::invalid_format(
                        "idempotency_key",
                        "key already used for another subscription",
                    )
                    .into());
                }
                info!(
                    subscription_id = %subscription.id(),
                    idempotency_key = %key,
                    status = existing.status.as_str(),
                    "charge key already claimed"
                );
                return self.resume(ctx, existing).await;
            }
        };

        info!(
            subscription_id = %subscription.id(),
            idempotency_key = %key,
            amount = %command.request.amount(),
            method = %command.request.method(),
            gateway = self.gateway.name(),
            "charging subscription"
        );

        let gateway = self.gateway.as_ref();
        let request = &command.request;
        let key_ref = &key;
        let gateway_result = self
            .retry
            .run("process_payment", move || gateway.process_payment(request, key_ref))
            .await;

        let result = match gateway_result {
            Ok(result) => result,
            Err(err) => {
                if let Err(release_err) = self.idempotency.release(&key).await {
                    error!(
                        idempotency_key = %key,
                        error = %release_err,
                        "failed to release charge claim"
                    );
                }
                return Err(ChargeError::Gateway(err));
            }
        };
        let result = match result.reference {
            Some(_) => result,
            None => result.with_reference(key.as_str()),
        };

        self.settle(ctx, record, result, self.clock.now()).await
    }

    /// Continues from a key that was claimed earlier.
    async fn resume(
        &self,
        ctx: &RequestContext,
        existing: IdempotencyRecord,
    ) -> Result<ChargeOutcome, ChargeError> {
        let Some(stored) = existing.to_result() else {
            return Ok(ChargeOutcome::InProgress { key: existing.key });
        };
        if existing.status != IdempotencyStatus::Pending {
            return Ok(ChargeOutcome::Duplicate { result: stored });
        }

        let gateway = self.gateway.as_ref();
        let external_id = stored.external_id.clone();
        let external_ref = external_id.as_str();
        match self
            .retry
            .run("get_payment_status", move || gateway.get_payment_status(external_ref))
            .await
        {
            Ok(polled) if polled.status.is_final() => {
                let polled = with_key_reference(polled, &existing.key);
                self.settle(ctx, existing, polled, self.clock.now()).await
            }
            Ok(_) => Ok(ChargeOutcome::Pending { result: stored }),
            Err(err) => {
                warn!(
                    idempotency_key = %existing.key,
                    external_id = %external_id,
                    error = %err,
                    "could not poll pending charge"
                );
                Ok(ChargeOutcome::Pending { result: stored })
            }
        }
    }

    // ------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------

    /// Verifies and applies a processor callback.
    ///
    /// Delivering the same payload again changes nothing.
    pub async fn reconcile_webhook(
        &self,
        ctx: &RequestContext,
        payload: &[u8],
        signature: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !self.gateway.validate_webhook_signature(payload, signature) {
            warn!(
                target: "security",
                gateway = self.gateway.name(),
                payload_len = payload.len(),
                ip_address = ?ctx.ip_address,
                "webhook signature rejected"
            );
            return Err(ReconcileError::InvalidSignature);
        }

        let result = match self.gateway.process_webhook(payload).await {
            Ok(result) => result,
            Err(err)
                if matches!(
                    err.code,
                    PaymentErrorCode::UnsupportedEvent | PaymentErrorCode::InvalidWebhook
                ) =>
            {
                info!(gateway = self.gateway.name(), reason = %err, "webhook ignored");
                return Ok(ReconcileOutcome::Ignored {
                    reason: err.message,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let Some(record) = self.find_record(&result).await? else {
            warn!(
                external_id = %result.external_id,
                reference = ?result.reference,
                "webhook for unknown transaction"
            );
            return Ok(ReconcileOutcome::UnknownSubject {
                external_id: result.external_id,
            });
        };

        let incoming = IdempotencyStatus::from(result.status);
        if !record.status.can_transition_to(&incoming) {
            info!(
                idempotency_key = %record.key,
                external_id = %result.external_id,
                recorded = record.status.as_str(),
                reported = incoming.as_str(),
                "webhook already reconciled"
            );
            return Ok(ReconcileOutcome::AlreadyReconciled {
                external_id: result.external_id,
            });
        }

        let result = with_key_reference(result, &record.key);
        let outcome = self.settle(ctx, record, result, self.clock.now()).await?;
        Ok(ReconcileOutcome::Applied(outcome))
    }

    async fn find_record(
        &self,
        result: &PaymentResult,
    ) -> Result<Option<IdempotencyRecord>, ReconcileError> {
        if let Some(key) = result
            .reference
            .as_deref()
            .and_then(|reference| IdempotencyKey::new(reference).ok())
        {
            if let Some(record) = self.idempotency.find_by_key(&key).await? {
                return Ok(Some(record));
            }
        }
        Ok(self
            .idempotency
            .find_by_external_id(&result.external_id)
            .await?)
    }

    // ------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------

    /// Resolves charges that stayed pending longer than `timeout`.
    ///
    /// Each is polled once more; a final status is settled normally and a
    /// still-pending one is failed with `pending_timeout`.
    pub async fn sweep_stale_pending(
        &self,
        now: Timestamp,
        timeout: Duration,
    ) -> Result<SweepReport, ChargeError> {
        let ctx = RequestContext::system();
        let stale = self
            .idempotency
            .find_pending_older_than(now.minus(timeout))
            .await?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for record in stale {
            let external_id = record.external_id.clone().unwrap_or_default();
            let polled = if external_id.is_empty() {
                None
            } else {
                match self.gateway.get_payment_status(&external_id).await {
                    Ok(result) if result.status.is_final() => Some(result),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(
                            idempotency_key = %record.key,
                            external_id = %external_id,
                            error = %err,
                            "pending charge could not be polled"
                        );
                        None
                    }
                }
            };

            let result = match polled {
                Some(result) => {
                    report.settled += 1;
                    result
                }
                None => {
                    report.timed_out += 1;
                    PaymentResult::failed(
                        external_id,
                        record.amount.clone(),
                        PaymentFailure::new(
                            RejectionReason::PendingTimeout.code(),
                            "payment was not confirmed before the pending timeout",
                        ),
                    )
                }
            };
            let result = with_key_reference(result, &record.key);

            let key = record.key.clone();
            if let Err(err) = self.settle(&ctx, record, result, now).await {
                report.errors += 1;
                error!(idempotency_key = %key, error = %err, "failed to settle stale charge");
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                settled = report.settled,
                timed_out = report.timed_out,
                errors = report.errors,
                "pending charge sweep finished"
            );
        }
        Ok(report)
    }

    /// Expires subscriptions whose period and grace window have elapsed.
    pub async fn expire_overdue(&self, now: Timestamp) -> Result<Vec<SubscriptionId>, ChargeError> {
        let ctx = RequestContext::system();
        let mut expired = Vec::new();

        for subscription in self.ledger.overdue(now).await? {
            match self.ledger.expire(subscription.id(), now).await {
                Ok(LedgerOutcome::Applied { before, after }) => {
                    self.audit_status_change(&ctx, &before, &after, now, "subscription expired")
                        .await?;
                    expired.push(after.id());
                }
                Ok(LedgerOutcome::Unchanged(_)) => {}
                Err(LedgerError::Subscription(err)) => {
                    warn!(
                        subscription_id = %subscription.id(),
                        error = %err,
                        "skipping subscription during expiration sweep"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired overdue subscriptions");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Records `result` on the charge attempt and applies it to the ledger.
    async fn settle(
        &self,
        ctx: &RequestContext,
        record: IdempotencyRecord,
        result: PaymentResult,
        now: Timestamp,
    ) -> Result<ChargeOutcome, ChargeError> {
        let next = match record.settle(&result, now) {
            Ok(next) => next,
            Err(_) => {
                info!(
                    idempotency_key = %record.key,
                    recorded = record.status.as_str(),
                    reported = result.status.as_str(),
                    "charge already settled, ignoring result"
                );
                let stored = record.to_result().unwrap_or(result);
                return Ok(ChargeOutcome::Duplicate { result: stored });
            }
        };

        let settled = match self.idempotency.complete(&next, record.status).await? {
            CompletionOutcome::Applied(settled) => settled,
            CompletionOutcome::Conflict(current) => {
                info!(
                    idempotency_key = %record.key,
                    "charge settled concurrently, treating as already applied"
                );
                let stored = current
                    .and_then(|current| current.to_result())
                    .unwrap_or(result);
                return Ok(ChargeOutcome::Duplicate { result: stored });
            }
        };

        let applied = match result.status {
            PaymentStatus::Pending => {
                info!(
                    idempotency_key = %settled.key,
                    external_id = %result.external_id,
                    "charge pending at processor"
                );
                return Ok(ChargeOutcome::Pending { result });
            }
            PaymentStatus::Approved => self.apply_approval(ctx, &settled, result, now).await,
            PaymentStatus::Rejected | PaymentStatus::Failed => {
                self.apply_rejection(ctx, &settled, result, now).await
            }
        };

        if let Err(ChargeError::Ledger(LedgerError::Storage(err))) = &applied {
            self.reopen(&record, &settled, err, now).await;
        }
        applied
    }

    /// Rolls a settled record back when its ledger write failed, so the
    /// next poll or webhook applies the outcome again.
    async fn reopen(
        &self,
        previous: &IdempotencyRecord,
        settled: &IdempotencyRecord,
        cause: &DomainError,
        now: Timestamp,
    ) {
        let reopened = previous.reopen(settled, now);
        match self.idempotency.complete(&reopened, settled.status).await {
            Ok(CompletionOutcome::Applied(_)) => warn!(
                idempotency_key = %settled.key,
                subscription_id = %settled.subscription_id,
                status = reopened.status.as_str(),
                error = %cause,
                "ledger write failed, charge reopened for reconciliation"
            ),
            Ok(CompletionOutcome::Conflict(_)) => {}
            Err(err) => error!(
                idempotency_key = %settled.key,
                error = %err,
                cause = %cause,
                "failed to reopen charge after ledger error"
            ),
        }
    }

    async fn apply_approval(
        &self,
        ctx: &RequestContext,
        record: &IdempotencyRecord,
        result: PaymentResult,
        now: Timestamp,
    ) -> Result<ChargeOutcome, ChargeError> {
        let payment = AppliedPayment {
            idempotency_key: record.key.to_string(),
            external_id: result.external_id.clone(),
            amount: result.amount.clone(),
            method: record.method,
        };

        let (before, after) = match self
            .ledger
            .record_approval(record.subscription_id, payment, now)
            .await
        {
            Ok(LedgerOutcome::Applied { before, after }) => (before, after),
            Ok(LedgerOutcome::Unchanged(subscription)) => {
                return Ok(ChargeOutcome::Approved {
                    result,
                    subscription,
                })
            }
            Err(LedgerError::Subscription(SubscriptionError::InvalidTransition { from, .. })) => {
                return self.record_unapplied(ctx, record, result, from, now).await;
            }
            Err(err) => return Err(err.into()),
        };

        self.audit
            .record(
                AuditLogEntry::new(AuditAction::PaymentProcessed, SUBSCRIPTION_MODEL, after.id(), ctx, now)
                    .attributed_to(after.user_id(), after.tenant_id())
                    .with_old_values(ledger_values(&before))
                    .with_new_values(json!({
                        "subscription": ledger_values(&after),
                        "payment": payment_values(record, &result),
                    }))
                    .with_description(format!(
                        "payment {} approved: {}",
                        result.external_id, result.amount
                    )),
            )
            .await?;

        if before.status() != SubscriptionStatus::Active {
            self.audit
                .record(
                    AuditLogEntry::new(AuditAction::SubscriptionActivated, SUBSCRIPTION_MODEL, after.id(), ctx, now)
                        .attributed_to(after.user_id(), after.tenant_id())
                        .with_old_values(json!({ "status": before.status() }))
                        .with_new_values(json!({ "status": after.status() }))
                        .with_description(format!("subscription activated from '{}'", before.status())),
                )
                .await?;
        }

        self.publish(
            ctx,
            BillingEvent::PaymentProcessed {
                event_id: EventId::new(),
                subscription_id: after.id(),
                user_id: after.user_id(),
                tenant_id: after.tenant_id(),
                amount: result.amount.clone(),
                payment_method: record.method,
                external_id: result.external_id.clone(),
                period_end: after.period_end().unwrap_or(now),
                occurred_at: now,
            },
        )
        .await;

        info!(
            subscription_id = %after.id(),
            idempotency_key = %record.key,
            external_id = %result.external_id,
            period_end = ?after.period_end(),
            "payment approved"
        );
        Ok(ChargeOutcome::Approved {
            result,
            subscription: after,
        })
    }

    async fn apply_rejection(
        &self,
        ctx: &RequestContext,
        record: &IdempotencyRecord,
        result: PaymentResult,
        now: Timestamp,
    ) -> Result<ChargeOutcome, ChargeError> {
        let reason = result
            .rejection_reason()
            .unwrap_or(RejectionReason::ProcessingError);

        let (before, after) = match self
            .ledger
            .record_rejection(record.subscription_id, record.key.as_str(), now)
            .await
        {
            Ok(LedgerOutcome::Applied { before, after }) => (before, after),
            Ok(LedgerOutcome::Unchanged(subscription)) => {
                return Ok(ChargeOutcome::Rejected {
                    result,
                    reason,
                    attempt_count: subscription.failed_charge_attempts(),
                })
            }
            Err(LedgerError::Subscription(SubscriptionError::InvalidTransition { from, .. })) => {
                return self.record_unapplied(ctx, record, result, from, now).await;
            }
            Err(err) => return Err(err.into()),
        };
        let attempt_count = after.failed_charge_attempts();

        self.audit
            .record(
                AuditLogEntry::new(AuditAction::PaymentProcessed, SUBSCRIPTION_MODEL, after.id(), ctx, now)
                    .attributed_to(after.user_id(), after.tenant_id())
                    .with_old_values(ledger_values(&before))
                    .with_new_values(json!({
                        "subscription": ledger_values(&after),
                        "payment": payment_values(record, &result),
                    }))
                    .with_description(format!(
                        "payment {} {}: {}",
                        result.external_id,
                        result.status.as_str(),
                        reason
                    )),
            )
            .await?;

        self.publish(
            ctx,
            BillingEvent::PaymentRejected {
                event_id: EventId::new(),
                subscription_id: after.id(),
                user_id: after.user_id(),
                tenant_id: after.tenant_id(),
                reason,
                attempt_count,
                occurred_at: now,
            },
        )
        .await;

        info!(
            subscription_id = %after.id(),
            idempotency_key = %record.key,
            external_id = %result.external_id,
            reason = %reason,
            attempt_count,
            status = %after.status(),
            "payment rejected"
        );
        Ok(ChargeOutcome::Rejected {
            result,
            reason,
            attempt_count,
        })
    }

    /// A settled charge for a subscription that can no longer take it.
    async fn record_unapplied(
        &self,
        ctx: &RequestContext,
        record: &IdempotencyRecord,
        result: PaymentResult,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<ChargeOutcome, ChargeError> {
        warn!(
            subscription_id = %record.subscription_id,
            idempotency_key = %record.key,
            external_id = %result.external_id,
            payment_status = result.status.as_str(),
            subscription_status = %status,
            "settled charge for terminal subscription, ledger unchanged"
        );

        self.audit
            .record(
                AuditLogEntry::new(
                    AuditAction::PaymentProcessed,
                    SUBSCRIPTION_MODEL,
                    record.subscription_id,
                    ctx,
                    now,
                )
                .with_new_values(json!({ "payment": payment_values(record, &result) }))
                .with_description(format!(
                    "payment {} {} for {} subscription, ledger unchanged",
                    result.external_id,
                    result.status.as_str(),
                    status
                )),
            )
            .await?;

        Ok(ChargeOutcome::Unapplied { result, status })
    }

    async fn audit_status_change(
        &self,
        ctx: &RequestContext,
        before: &Subscription,
        after: &Subscription,
        now: Timestamp,
        description: &str,
    ) -> Result<(), ChargeError> {
        self.audit
            .record(
                AuditLogEntry::new(AuditAction::StatusChanged, SUBSCRIPTION_MODEL, after.id(), ctx, now)
                    .attributed_to(after.user_id(), after.tenant_id())
                    .with_old_values(json!({ "status": before.status() }))
                    .with_new_values(json!({ "status": after.status() }))
                    .with_description(description),
            )
            .await?;
        Ok(())
    }

    /// Best-effort publish; failures are logged and never undo the change.
    async fn publish(&self, ctx: &RequestContext, event: BillingEvent) {
        let event_type = event.kind().as_str();
        let envelope = match event.to_envelope() {
            Ok(envelope) => with_context(envelope, ctx),
            Err(err) => {
                error!(event_type, error = %err, "failed to serialize billing event");
                return;
            }
        };

        if let Err(err) = self.events.publish(envelope).await {
            warn!(event_type, error = %err, "failed to publish billing event");
        }
    }
}

fn with_context(envelope: EventEnvelope, ctx: &RequestContext) -> EventEnvelope {
    let mut envelope = envelope;
    if let Some(correlation_id) = &ctx.correlation_id {
        envelope = envelope.with_correlation_id(correlation_id.clone());
    }
    if let Some(user_id) = ctx.actor_user_id {
        envelope = envelope.with_user_id(user_id.value().to_string());
    }
    if let Some(tenant_id) = ctx.tenant_id {
        envelope = envelope.with_tenant_id(tenant_id.value().to_string());
    }
    envelope
}

fn with_key_reference(result: PaymentResult, key: &IdempotencyKey) -> PaymentResult {
    if result.reference.is_some() {
        result
    } else {
        result.with_reference(key.as_str())
    }
}

fn ledger_values(subscription: &Subscription) -> JsonValue {
    json!({
        "status": subscription.status(),
        "period_start": subscription.period_start(),
        "period_end": subscription.period_end(),
        "amount_paid": subscription.amount_paid(),
        "payment_method": subscription.payment_method(),
        "external_transaction_id": subscription.external_transaction_id(),
        "failed_charge_attempts": subscription.failed_charge_attempts(),
        "version": subscription.version(),
    })
}

fn payment_values(record: &IdempotencyRecord, result: &PaymentResult) -> JsonValue {
    json!({
        "idempotency_key": record.key.as_str(),
        "external_id": result.external_id,
        "status": result.status,
        "amount": result.amount,
        "method": record.method,
        "failure": result.failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryEventBus;
    use crate::application::billing::RetryPolicy;
    use crate::adapters::gateway::{SandboxGateway, SandboxOutcome};
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryIdempotencyStore, InMemorySubscriptionRepository,
    };
    use crate::domain::foundation::{Money, PlanId, TenantId, UserId};
    use crate::domain::subscription::{BillingInterval, PlanSummary};
    use crate::domain::foundation::ErrorCode;
    use crate::ports::{AuditLogRepository, PaymentError, SubscriptionRepository, WriteOutcome};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FixedClock(Mutex<Timestamp>);

    impl FixedClock {
        fn at(now: Timestamp) -> Self {
            Self(Mutex::new(now))
        }

        fn advance_days(&self, days: i64) {
            let mut now = self.0.lock().unwrap();
            *now = now.add_days(days);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        orchestrator: PaymentOrchestrator,
        gateway: Arc<SandboxGateway>,
        audit_log: Arc<InMemoryAuditLog>,
        events: Arc<InMemoryEventBus>,
        clock: Arc<FixedClock>,
    }

    fn t0() -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemorySubscriptionRepository::new()))
    }

    fn harness_with(subscriptions: Arc<dyn SubscriptionRepository>) -> Harness {
        let gateway = Arc::new(SandboxGateway::new(SecretString::new("whsec_test".to_string())));
        let audit_log = Arc::new(InMemoryAuditLog::new());
        let events = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(FixedClock::at(t0()));
        let ledger = Arc::new(SubscriptionLedger::new(subscriptions, 7));
        let orchestrator = PaymentOrchestrator::new(
            gateway.clone(),
            ledger,
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(AuditRecorder::new(audit_log.clone())),
            events.clone(),
            RetryExecutor::new(
                RetryPolicy::default()
                    .with_initial_delay(std::time::Duration::from_millis(1)),
            ),
            clock.clone(),
        );
        Harness {
            orchestrator,
            gateway,
            audit_log,
            events,
            clock,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::for_user(Some(TenantId::new(2).unwrap()), UserId::new(10).unwrap())
    }

    async fn open_trial(h: &Harness) -> Subscription {
        h.orchestrator
            .open_subscription(
                &ctx(),
                OpenSubscription {
                    user_id: UserId::new(10).unwrap(),
                    tenant_id: Some(TenantId::new(2).unwrap()),
                    plan: PlanSummary::new(
                        PlanId::new(1).unwrap(),
                        "Profissional",
                        Money::new(4990, "BRL").unwrap(),
                        BillingInterval::Monthly,
                    ),
                    initial_status: SubscriptionStatus::Trial,
                    grace_period_days: None,
                },
            )
            .await
            .unwrap()
    }

    fn card_request() -> PaymentRequest {
        PaymentRequest::card(
            Money::new(4990, "BRL").unwrap(),
            "Plano Profissional - marco",
            "cliente@example.com",
            "tok_visa",
            1,
        )
        .unwrap()
    }

    async fn audit_actions(h: &Harness, id: SubscriptionId) -> Vec<AuditAction> {
        h.audit_log
            .find_by_model(SUBSCRIPTION_MODEL, &id.to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    #[tokio::test]
    async fn approved_charge_activates_subscription() {
        let h = harness();
        let sub = open_trial(&h).await;

        let outcome = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        let ChargeOutcome::Approved { result, subscription } = outcome else {
            panic!("expected approval, got {:?}", outcome);
        };
        assert_eq!(result.external_id, "tx_1");
        assert_eq!(subscription.status(), SubscriptionStatus::Active);
        assert_eq!(subscription.period_end(), Some(t0().add_days(30)));
        assert_eq!(h.events.events_of_type("payment.processed.v1").len(), 1);
        assert_eq!(
            audit_actions(&h, sub.id())
                .await
                .iter()
                .filter(|a| **a == AuditAction::PaymentProcessed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn rejected_charge_awaits_payment_with_attempt_count() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::reject("insufficient_funds"));

        let outcome = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ChargeOutcome::Rejected {
                reason: RejectionReason::InsufficientFunds,
                attempt_count: 1,
                ..
            }
        ));
        let view = h.orchestrator.view(sub.id()).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::AwaitingPayment);

        let rejected = h.events.events_of_type("payment.rejected.v1");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].payload["attempt_count"], 1);
    }

    #[tokio::test]
    async fn second_charge_in_same_period_is_a_duplicate() {
        let h = harness();
        let sub = open_trial(&h).await;

        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        assert!(matches!(second, ChargeOutcome::Duplicate { .. }));
        assert_eq!(h.gateway.charge_count(), 1);
        assert_eq!(h.events.events_of_type("payment.processed.v1").len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_under_one_key() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.fail_transiently(2);

        let outcome = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        assert!(matches!(outcome, ChargeOutcome::Approved { .. }));
        assert_eq!(h.gateway.call_count(), 3);
        assert_eq!(h.gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_release_the_key() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.fail_transiently(3);

        let err = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChargeError::Gateway(PaymentError { .. })));

        let retry = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();
        assert!(matches!(retry, ChargeOutcome::Approved { .. }));
    }

    #[tokio::test]
    async fn charging_cancelled_subscription_fails() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.orchestrator.cancel_subscription(&ctx(), sub.id()).await.unwrap();

        let err = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert_eq!(h.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn currency_must_match_plan() {
        let h = harness();
        let sub = open_trial(&h).await;
        let usd = PaymentRequest::pix(
            Money::new(4990, "USD").unwrap(),
            "Plano",
            "cliente@example.com",
        )
        .unwrap();

        let err = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), usd))
            .await
            .unwrap_err();
        assert!(matches!(err, ChargeError::Validation(_)));
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_has_no_effect() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::Pend);
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();
        let settled = h.gateway.settle("tx_1", SandboxOutcome::Approve).unwrap();
        let (payload, _) = h.gateway.webhook_for(&settled).unwrap();

        let err = h
            .orchestrator
            .reconcile_webhook(&RequestContext::system(), &payload, "deadbeef")
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::InvalidSignature));
        let view = h.orchestrator.view(sub.id()).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::Trial);
    }

    #[tokio::test]
    async fn pending_charge_is_settled_by_webhook_once() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::Pend);

        let outcome = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();
        assert!(matches!(outcome, ChargeOutcome::Pending { .. }));
        assert_eq!(
            h.orchestrator.view(sub.id()).await.unwrap().status,
            SubscriptionStatus::Trial
        );

        let settled = h.gateway.settle("tx_1", SandboxOutcome::Approve).unwrap();
        let (payload, signature) = h.gateway.webhook_for(&settled).unwrap();
        let system = RequestContext::system();

        let first = h
            .orchestrator
            .reconcile_webhook(&system, &payload, &signature)
            .await
            .unwrap();
        let second = h
            .orchestrator
            .reconcile_webhook(&system, &payload, &signature)
            .await
            .unwrap();

        assert!(matches!(
            first,
            ReconcileOutcome::Applied(ChargeOutcome::Approved { .. })
        ));
        assert_eq!(
            second,
            ReconcileOutcome::AlreadyReconciled {
                external_id: "tx_1".to_string()
            }
        );
        assert_eq!(h.events.events_of_type("payment.processed.v1").len(), 1);
    }

    #[tokio::test]
    async fn webhook_for_unknown_transaction_is_a_no_op() {
        let h = harness();
        let foreign = PaymentResult::approved("tx_foreign", Money::new(100, "BRL").unwrap());
        let (payload, signature) = h.gateway.webhook_for(&foreign).unwrap();

        let outcome = h
            .orchestrator
            .reconcile_webhook(&RequestContext::system(), &payload, &signature)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::UnknownSubject {
                external_id: "tx_foreign".to_string()
            }
        );
    }

    #[tokio::test]
    async fn late_approval_upgrades_rejected_charge() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::reject("card_declined"));
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        let settled = h.gateway.settle("tx_1", SandboxOutcome::Approve).unwrap();
        let (payload, signature) = h.gateway.webhook_for(&settled).unwrap();
        let outcome = h
            .orchestrator
            .reconcile_webhook(&RequestContext::system(), &payload, &signature)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied(ChargeOutcome::Approved { .. })
        ));
        let view = h.orchestrator.view(sub.id()).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn stale_pending_charge_times_out_to_awaiting_payment() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::Pend);
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        h.clock.advance_days(4);
        let report = h
            .orchestrator
            .sweep_stale_pending(h.clock.now(), Duration::hours(72))
            .await
            .unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 1,
                settled: 0,
                timed_out: 1,
                errors: 0
            }
        );
        let view = h.orchestrator.view(sub.id()).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::AwaitingPayment);
        let rejected = h.events.events_of_type("payment.rejected.v1");
        assert_eq!(rejected[0].payload["reason"], "pending_timeout");
    }

    #[tokio::test]
    async fn fresh_pending_charge_is_left_alone() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::Pend);
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        let report = h
            .orchestrator
            .sweep_stale_pending(h.clock.now(), Duration::hours(72))
            .await
            .unwrap();

        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn overdue_active_subscription_expires() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        let in_grace = t0().add_days(36);
        assert!(h.orchestrator.expire_overdue(in_grace).await.unwrap().is_empty());

        let expired = h.orchestrator.expire_overdue(t0().add_days(38)).await.unwrap();
        assert_eq!(expired, vec![sub.id()]);
        assert!(audit_actions(&h, sub.id())
            .await
            .contains(&AuditAction::StatusChanged));
    }

    #[tokio::test]
    async fn cancel_is_audited_once() {
        let h = harness();
        let sub = open_trial(&h).await;

        h.orchestrator.cancel_subscription(&ctx(), sub.id()).await.unwrap();
        let again = h.orchestrator.cancel_subscription(&ctx(), sub.id()).await.unwrap();

        assert_eq!(again.status(), SubscriptionStatus::Cancelled);
        assert_eq!(
            audit_actions(&h, sub.id())
                .await
                .iter()
                .filter(|a| **a == AuditAction::SubscriptionCancelled)
                .count(),
            1
        );
    }

    /// Subscription storage whose next conditional write fails once.
    struct FlakyStorage {
        inner: InMemorySubscriptionRepository,
        fail_next_write: AtomicBool,
    }

    impl FlakyStorage {
        fn failing_once() -> Self {
            Self {
                inner: InMemorySubscriptionRepository::new(),
                fail_next_write: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl SubscriptionRepository for FlakyStorage {
        async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
            self.inner.insert(subscription).await
        }

        async fn find_by_id(
            &self,
            id: SubscriptionId,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.find_by_id(id).await
        }

        async fn update_if(
            &self,
            subscription: &Subscription,
            expected_status: SubscriptionStatus,
            expected_version: u64,
        ) -> Result<WriteOutcome, DomainError> {
            if self.fail_next_write.swap(false, Ordering::SeqCst) {
                return Err(DomainError::new(ErrorCode::DatabaseError, "connection reset"));
            }
            self.inner
                .update_if(subscription, expected_status, expected_version)
                .await
        }

        async fn find_overdue(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
            self.inner.find_overdue(now).await
        }
    }

    #[tokio::test]
    async fn approval_lost_to_a_storage_error_is_applied_on_the_next_charge() {
        let h = harness_with(Arc::new(FlakyStorage::failing_once()));
        let sub = open_trial(&h).await;

        let err = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseError);
        assert_eq!(
            h.orchestrator.view(sub.id()).await.unwrap().status,
            SubscriptionStatus::Trial
        );

        let retry = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        assert!(matches!(retry, ChargeOutcome::Approved { .. }));
        assert_eq!(
            h.orchestrator.view(sub.id()).await.unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(h.gateway.charge_count(), 1);
        assert_eq!(h.events.events_of_type("payment.processed.v1").len(), 1);
    }

    #[tokio::test]
    async fn approval_lost_to_a_storage_error_is_applied_by_the_webhook() {
        let h = harness_with(Arc::new(FlakyStorage::failing_once()));
        let sub = open_trial(&h).await;
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap_err();

        let approved = PaymentResult::approved("tx_1", Money::new(4990, "BRL").unwrap());
        let (payload, signature) = h.gateway.webhook_for(&approved).unwrap();
        let outcome = h
            .orchestrator
            .reconcile_webhook(&RequestContext::system(), &payload, &signature)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied(ChargeOutcome::Approved { .. })
        ));
        assert_eq!(
            h.orchestrator.view(sub.id()).await.unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn plain_retry_after_a_decline_reaches_the_processor() {
        let h = harness();
        let sub = open_trial(&h).await;
        h.gateway.script(SandboxOutcome::reject("card_declined"));
        h.orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        let retry = h
            .orchestrator
            .charge(&ctx(), ChargeCommand::new(sub.id(), card_request()))
            .await
            .unwrap();

        assert!(matches!(retry, ChargeOutcome::Approved { .. }));
        assert_eq!(h.gateway.call_count(), 2);
        assert_eq!(
            h.orchestrator.view(sub.id()).await.unwrap().status,
            SubscriptionStatus::Active
        );
    }
}
