//! Scriptable in-process gateway.
//!
//! Used for local runs and tests. Charges get sequential ids (`tx_1`,
//! `tx_2`, ...) and resolve according to a queue of scripted outcomes
//! (approve when the queue is empty). Webhooks use a bare hex HMAC-SHA256
//! in `X-Sandbox-Signature`.
//!
//! # Example
//!
//! ```ignore
//! let gateway = SandboxGateway::new(secret);
//! gateway.script(SandboxOutcome::Pend);
//! let result = gateway.process_payment(&request, &key).await?;
//!
//! let settled = gateway.settle(&result.external_id, SandboxOutcome::Approve).unwrap();
//! let (payload, signature) = gateway.webhook_for(&settled)?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Money;
use crate::domain::payment::{
    sign_hex, verify_hex_signature, IdempotencyKey, PaymentFailure, PaymentRequest,
    PaymentResult, PaymentStatus,
};
use crate::ports::{PaymentError, PaymentErrorCode, PaymentGateway};

const WEBHOOK_EVENT_TYPE: &str = "payment.updated";

/// How the next sandbox charge (or a `settle` call) resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    Approve,
    Pend,
    Reject { code: String, message: String },
    Fail { code: String, message: String },
}

impl SandboxOutcome {
    pub fn reject(code: impl Into<String>) -> Self {
        let code = code.into();
        SandboxOutcome::Reject {
            message: format!("sandbox declined the charge: {}", code),
            code,
        }
    }

    pub fn fail(code: impl Into<String>) -> Self {
        let code = code.into();
        SandboxOutcome::Fail {
            message: format!("sandbox failed the charge: {}", code),
            code,
        }
    }

    fn resolve(&self, external_id: &str, amount: Money) -> PaymentResult {
        match self {
            SandboxOutcome::Approve => PaymentResult::approved(external_id, amount),
            SandboxOutcome::Pend => PaymentResult::pending(external_id, amount),
            SandboxOutcome::Reject { code, message } => PaymentResult::rejected(
                external_id,
                amount,
                PaymentFailure::new(code.as_str(), message.as_str()),
            ),
            SandboxOutcome::Fail { code, message } => PaymentResult::failed(
                external_id,
                amount,
                PaymentFailure::new(code.as_str(), message.as_str()),
            ),
        }
    }
}

/// Webhook body sent by the sandbox.
#[derive(Debug, Serialize, Deserialize)]
struct SandboxWebhook {
    #[serde(rename = "type")]
    event_type: String,
    data: SandboxPayment,
}

#[derive(Debug, Serialize, Deserialize)]
struct SandboxPayment {
    id: String,
    status: PaymentStatus,
    amount_minor: i64,
    currency: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    failure_code: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
}

#[derive(Default)]
struct SandboxState {
    script: VecDeque<SandboxOutcome>,
    transient_failures: u32,
    calls: usize,
    next_id: u64,
    charges: HashMap<String, PaymentResult>,
    by_key: HashMap<String, String>,
}

/// In-process `PaymentGateway`.
pub struct SandboxGateway {
    webhook_secret: SecretString,
    state: Mutex<SandboxState>,
}

impl SandboxGateway {
    pub fn new(webhook_secret: SecretString) -> Self {
        Self {
            webhook_secret,
            state: Mutex::new(SandboxState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SandboxState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues the outcome of the next new charge.
    pub fn script(&self, outcome: SandboxOutcome) {
        self.state().script.push_back(outcome);
    }

    /// Makes the next `count` calls to `process_payment` fail with a
    /// retryable error before reaching the charge logic.
    pub fn fail_transiently(&self, count: u32) {
        self.state().transient_failures = count;
    }

    /// Every `process_payment` call, including failed and deduplicated ones.
    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Charges actually created.
    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    /// Moves an existing charge to a new outcome, as the processor would
    /// after an asynchronous settlement. Returns the updated result, or
    /// `None` if the charge is unknown.
    pub fn settle(&self, external_id: &str, outcome: SandboxOutcome) -> Option<PaymentResult> {
        let mut state = self.state();
        let current = state.charges.get(external_id)?;
        let mut updated = outcome.resolve(external_id, current.amount.clone());
        updated.reference = current.reference.clone();
        state
            .charges
            .insert(external_id.to_string(), updated.clone());
        Some(updated)
    }

    /// Signed webhook announcing `result`: `(payload, signature)`.
    pub fn webhook_for(&self, result: &PaymentResult) -> Result<(Vec<u8>, String), PaymentError> {
        let webhook = SandboxWebhook {
            event_type: WEBHOOK_EVENT_TYPE.to_string(),
            data: SandboxPayment {
                id: result.external_id.clone(),
                status: result.status,
                amount_minor: result.amount.amount_minor(),
                currency: result.amount.currency().to_string(),
                reference: result.reference.clone(),
                failure_code: result.failure.as_ref().map(|f| f.code.clone()),
                failure_message: result.failure.as_ref().map(|f| f.message.clone()),
            },
        };
        let payload = serde_json::to_vec(&webhook).map_err(|e| {
            PaymentError::new(PaymentErrorCode::ProviderError, e.to_string())
        })?;
        let signature = self.sign(&payload)?;
        Ok((payload, signature))
    }

    /// Hex HMAC-SHA256 of `payload` under the webhook secret.
    pub fn sign(&self, payload: &[u8]) -> Result<String, PaymentError> {
        sign_hex(&self.webhook_secret, payload)
            .map_err(|e| PaymentError::new(PaymentErrorCode::ProviderError, e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn signature_header(&self) -> &'static str {
        "X-Sandbox-Signature"
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
        key: &IdempotencyKey,
    ) -> Result<PaymentResult, PaymentError> {
        let mut state = self.state();
        state.calls += 1;

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(PaymentError::unavailable("sandbox is temporarily unavailable"));
        }

        if let Some(existing) = state
            .by_key
            .get(key.as_str())
            .and_then(|id| state.charges.get(id))
        {
            tracing::debug!(idempotency_key = %key, external_id = %existing.external_id, "sandbox replayed charge");
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let external_id = format!("tx_{}", state.next_id);
        let outcome = state.script.pop_front().unwrap_or(SandboxOutcome::Approve);
        let result = outcome
            .resolve(&external_id, request.amount().clone())
            .with_reference(key.as_str());

        state.charges.insert(external_id.clone(), result.clone());
        state.by_key.insert(key.to_string(), external_id);

        tracing::info!(
            external_id = %result.external_id,
            status = %result.status,
            idempotency_key = %key,
            "sandbox charge created"
        );
        Ok(result)
    }

    async fn get_payment_status(&self, external_id: &str) -> Result<PaymentResult, PaymentError> {
        self.state()
            .charges
            .get(external_id)
            .cloned()
            .ok_or_else(|| PaymentError::not_found("payment"))
    }

    async fn process_webhook(&self, payload: &[u8]) -> Result<PaymentResult, PaymentError> {
        let webhook: SandboxWebhook = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid JSON: {}", e)))?;

        if webhook.event_type != WEBHOOK_EVENT_TYPE {
            return Err(PaymentError::unsupported_event(&webhook.event_type));
        }

        let data = webhook.data;
        let amount = Money::new(data.amount_minor, &data.currency)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid amount: {}", e)))?;
        let failure = data.failure_code.map(|code| {
            PaymentFailure::new(code, data.failure_message.unwrap_or_default())
        });

        Ok(PaymentResult {
            status: data.status,
            external_id: data.id,
            amount,
            failure,
            reference: data.reference,
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hex_signature(&self.webhook_secret, payload, signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> SandboxGateway {
        SandboxGateway::new(SecretString::new("whsec_sandbox".to_string()))
    }

    fn request() -> PaymentRequest {
        PaymentRequest::pix(Money::new(4990, "BRL").unwrap(), "Plano", "a@example.com").unwrap()
    }

    fn key(value: &str) -> IdempotencyKey {
        IdempotencyKey::new(value).unwrap()
    }

    #[tokio::test]
    async fn same_key_charges_once() {
        let gw = gateway();

        let first = gw.process_payment(&request(), &key("k1")).await.unwrap();
        let second = gw.process_payment(&request(), &key("k1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.external_id, "tx_1");
        assert_eq!(first.reference.as_deref(), Some("k1"));
        assert_eq!(gw.call_count(), 2);
        assert_eq!(gw.charge_count(), 1);
    }

    #[tokio::test]
    async fn scripted_outcomes_apply_in_order() {
        let gw = gateway();
        gw.script(SandboxOutcome::reject("insufficient_funds"));
        gw.script(SandboxOutcome::Pend);

        let a = gw.process_payment(&request(), &key("k1")).await.unwrap();
        let b = gw.process_payment(&request(), &key("k2")).await.unwrap();
        let c = gw.process_payment(&request(), &key("k3")).await.unwrap();

        assert_eq!(a.status, PaymentStatus::Rejected);
        assert_eq!(a.failure.unwrap().code, "insufficient_funds");
        assert_eq!(b.status, PaymentStatus::Pending);
        assert_eq!(c.status, PaymentStatus::Approved);
    }

    #[tokio::test]
    async fn transient_failures_are_retryable() {
        let gw = gateway();
        gw.fail_transiently(1);

        let err = gw.process_payment(&request(), &key("k1")).await.unwrap_err();
        assert!(err.retryable);
        assert!(gw.process_payment(&request(), &key("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn settle_changes_status_lookup() {
        let gw = gateway();
        gw.script(SandboxOutcome::Pend);
        gw.process_payment(&request(), &key("k1")).await.unwrap();

        let settled = gw.settle("tx_1", SandboxOutcome::Approve).unwrap();

        assert_eq!(settled.reference.as_deref(), Some("k1"));
        assert_eq!(
            gw.get_payment_status("tx_1").await.unwrap().status,
            PaymentStatus::Approved
        );
        assert!(gw.settle("tx_404", SandboxOutcome::Approve).is_none());
    }

    #[tokio::test]
    async fn unknown_charge_is_not_found() {
        let err = gateway().get_payment_status("tx_9").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::NotFound);
    }

    #[tokio::test]
    async fn webhook_round_trips_with_valid_signature() {
        let gw = gateway();
        let result = PaymentResult::rejected(
            "tx_7",
            Money::new(100, "BRL").unwrap(),
            PaymentFailure::new("card_declined", "no"),
        )
        .with_reference("k7");

        let (payload, signature) = gw.webhook_for(&result).unwrap();

        assert!(gw.validate_webhook_signature(&payload, &signature));
        assert!(!gw.validate_webhook_signature(&payload, "00ff"));
        assert!(!gw.validate_webhook_signature(b"{}", &signature));
        assert_eq!(gw.process_webhook(&payload).await.unwrap(), result);
    }

    #[tokio::test]
    async fn other_event_types_are_unsupported() {
        let err = gateway()
            .process_webhook(br#"{"type":"payout.paid","data":{"id":"x","status":"approved","amount_minor":1,"currency":"BRL"}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::UnsupportedEvent);
    }
}
