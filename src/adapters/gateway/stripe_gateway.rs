//! Stripe payment gateway.
//!
//! Charges go through the Payment Intents API with `confirm=true`, so one
//! call both creates and attempts the charge. The idempotency key is sent
//! as the `Idempotency-Key` header (Stripe dedupes retries for 24h) and in
//! the intent metadata, which is how webhooks are matched back to a charge.
//!
//! # Security
//!
//! - Webhook signatures use the timestamped `t=...,v1=...` scheme with a
//!   5-minute replay window
//! - Secrets are held in `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret).with_require_livemode(true);
//! let gateway = StripeGateway::new(config, Arc::new(SystemClock))?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::stripe_types::{
    StripeApiError, StripeErrorBody, StripePaymentIntent, StripeWebhookEvent,
};
use crate::domain::foundation::Money;
use crate::domain::payment::{
    IdempotencyKey, PaymentFailure, PaymentMethod, PaymentRequest, PaymentResult,
    TimestampedSignatureVerifier, DEFAULT_TOLERANCE_SECS,
};
use crate::ports::{Clock, PaymentError, PaymentErrorCode, PaymentGateway};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    api_base_url: String,

    /// Reject test mode events.
    require_livemode: bool,

    request_timeout: Duration,

    webhook_tolerance_secs: i64,
}

impl StripeConfig {
    pub fn new(api_key: SecretString, webhook_secret: SecretString) -> Self {
        Self {
            api_key,
            webhook_secret,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            require_livemode: false,
            request_timeout: Duration::from_secs(30),
            webhook_tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Maximum webhook age accepted by signature verification.
    pub fn with_webhook_tolerance_secs(mut self, secs: i64) -> Self {
        self.webhook_tolerance_secs = secs;
        self
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("require_livemode", &self.require_livemode)
            .field("request_timeout", &self.request_timeout)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}

/// Stripe implementation of `PaymentGateway`.
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
    verifier: TimestampedSignatureVerifier,
    clock: Arc<dyn Clock>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, clock: Arc<dyn Clock>) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::network(format!("failed to build HTTP client: {}", e)))?;
        let verifier = TimestampedSignatureVerifier::new(
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
        );

        Ok(Self {
            config,
            http_client,
            verifier,
            clock,
        })
    }

    fn intent_form(request: &PaymentRequest, key: &IdempotencyKey) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), request.amount().amount_minor().to_string()),
            (
                "currency".to_string(),
                request.amount().currency().to_ascii_lowercase(),
            ),
            ("description".to_string(), request.description().to_string()),
            ("receipt_email".to_string(), request.payer_email().to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("metadata[idempotency_key]".to_string(), key.to_string()),
        ];

        for (name, value) in request.metadata() {
            form.push((format!("metadata[{}]", name), value.clone()));
        }

        match request.method() {
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
                form.push(("payment_method_types[]".to_string(), "card".to_string()));
                if let Some(token) = request.token() {
                    form.push(("payment_method".to_string(), token.to_string()));
                }
                if request.installments() > 1 {
                    let prefix = "payment_method_options[card][installments]";
                    form.push((format!("{}[enabled]", prefix), "true".to_string()));
                    form.push((format!("{}[plan][type]", prefix), "fixed_count".to_string()));
                    form.push((format!("{}[plan][interval]", prefix), "month".to_string()));
                    form.push((
                        format!("{}[plan][count]", prefix),
                        request.installments().to_string(),
                    ));
                }
            }
            PaymentMethod::Pix => {
                form.push(("payment_method_types[]".to_string(), "pix".to_string()));
                form.push(("payment_method_data[type]".to_string(), "pix".to_string()));
            }
            PaymentMethod::Boleto => {
                form.push(("payment_method_types[]".to_string(), "boleto".to_string()));
                form.push(("payment_method_data[type]".to_string(), "boleto".to_string()));
                form.push((
                    "payment_method_data[billing_details][email]".to_string(),
                    request.payer_email().to_string(),
                ));
                if let Some(tax_id) = request.payer_tax_id() {
                    form.push((
                        "payment_method_data[boleto][tax_id]".to_string(),
                        tax_id.to_string(),
                    ));
                }
            }
        }

        form
    }

    /// Maps a transport failure from reqwest.
    fn transport_error(err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::timeout(format!("Stripe did not answer in time: {}", err))
        } else {
            PaymentError::network(err.to_string())
        }
    }

    /// Reads the `{"error": {...}}` body of a non-2xx response.
    async fn read_api_error(response: reqwest::Response) -> (reqwest::StatusCode, StripeApiError) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let api_error = serde_json::from_str::<StripeErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_default();
        (status, api_error)
    }

    fn api_error(status: reqwest::StatusCode, api_error: StripeApiError) -> PaymentError {
        let code = match status.as_u16() {
            429 => PaymentErrorCode::RateLimitExceeded,
            401 => PaymentErrorCode::AuthenticationError,
            400 | 402 => PaymentErrorCode::InvalidRequest,
            404 => PaymentErrorCode::NotFound,
            500..=599 => PaymentErrorCode::ProviderUnavailable,
            _ => PaymentErrorCode::ProviderError,
        };
        let message = api_error
            .message
            .clone()
            .unwrap_or_else(|| format!("Stripe API error ({})", status));

        tracing::warn!(
            http_status = status.as_u16(),
            code = %code,
            provider_code = api_error.code.as_deref().unwrap_or(""),
            "Stripe call failed"
        );

        let mut error = PaymentError::new(code, message);
        if let Some(provider_code) = api_error.code {
            error = error.with_provider_code(provider_code);
        }
        error
    }

    /// Rejected result for a 402 `card_error`.
    ///
    /// Stripe omits the intent when the decline happens before one exists;
    /// the idempotency key then stands in as the transaction id.
    fn card_decline(
        request: &PaymentRequest,
        key: &IdempotencyKey,
        api_error: &StripeApiError,
    ) -> PaymentResult {
        let external_id = match api_error.payment_intent.as_ref() {
            Some(intent) => intent.id.clone(),
            None => {
                tracing::warn!(
                    idempotency_key = %key,
                    failure_code = api_error.failure_code(),
                    "card decline without payment intent, using idempotency key as transaction id"
                );
                key.to_string()
            }
        };
        PaymentResult::rejected(
            external_id,
            request.amount().clone(),
            PaymentFailure::new(api_error.failure_code(), api_error.message_or_default()),
        )
        .with_reference(key.as_str())
    }

    fn parse_event(&self, payload: &[u8]) -> Result<StripeWebhookEvent, PaymentError> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !event.livemode {
            tracing::warn!(event_id = %event.id, "Rejected test mode event in production");
            return Err(PaymentError::invalid_webhook(
                "Test mode events not allowed in production",
            ));
        }

        Ok(event)
    }
}

/// Canonical result for a payment intent in its current state.
pub(crate) fn intent_to_result(intent: StripePaymentIntent) -> Result<PaymentResult, PaymentError> {
    let amount = Money::new(intent.amount, &intent.currency).map_err(|e| {
        PaymentError::new(
            PaymentErrorCode::ProviderError,
            format!("Stripe returned an unusable amount: {}", e),
        )
    })?;
    let reference = intent.idempotency_key().map(str::to_string);

    let result = match intent.status.as_str() {
        "succeeded" => PaymentResult::approved(&intent.id, amount),
        "processing" | "requires_action" | "requires_confirmation" | "requires_capture" => {
            PaymentResult::pending(&intent.id, amount)
        }
        "requires_payment_method" => match &intent.last_payment_error {
            Some(err) => PaymentResult::rejected(
                &intent.id,
                amount,
                PaymentFailure::new(err.failure_code(), err.message_or_default()),
            ),
            None => PaymentResult::pending(&intent.id, amount),
        },
        "canceled" => PaymentResult::failed(
            &intent.id,
            amount,
            PaymentFailure::new("canceled", "payment was canceled"),
        ),
        other => {
            return Err(PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("unknown payment intent status '{}'", other),
            ))
        }
    };

    Ok(match reference {
        Some(reference) => result.with_reference(reference),
        None => result,
    })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
        key: &IdempotencyKey,
    ) -> Result<PaymentResult, PaymentError> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", key.as_str())
            .form(&Self::intent_form(request, key))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            let (status, api_error) = Self::read_api_error(response).await;
            // Declines raised during confirmation come back as 402 card_error.
            if status == reqwest::StatusCode::PAYMENT_REQUIRED
                && api_error.error_type.as_deref() == Some("card_error")
            {
                return Ok(Self::card_decline(request, key, &api_error));
            }
            return Err(Self::api_error(status, api_error));
        }

        let intent: StripePaymentIntent = response.json().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;

        let result = intent_to_result(intent)?;
        tracing::info!(
            external_id = %result.external_id,
            status = %result.status,
            idempotency_key = %key,
            "Stripe payment intent confirmed"
        );
        Ok(match result.reference {
            Some(_) => result,
            None => result.with_reference(key.as_str()),
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> Result<PaymentResult, PaymentError> {
        let url = format!("{}/v1/payment_intents/{}", self.config.api_base_url, external_id);

        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::not_found("payment_intent"));
        }

        if !response.status().is_success() {
            let (status, api_error) = Self::read_api_error(response).await;
            return Err(Self::api_error(status, api_error));
        }

        let intent: StripePaymentIntent = response.json().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;

        intent_to_result(intent)
    }

    async fn process_webhook(&self, payload: &[u8]) -> Result<PaymentResult, PaymentError> {
        let event = self.parse_event(payload)?;

        match event.event_type.as_str() {
            "payment_intent.succeeded"
            | "payment_intent.payment_failed"
            | "payment_intent.processing"
            | "payment_intent.canceled" => {}
            other => return Err(PaymentError::unsupported_event(other)),
        }

        let intent: StripePaymentIntent =
            serde_json::from_value(event.data.object).map_err(|e| {
                PaymentError::invalid_webhook(format!("Invalid payment intent: {}", e))
            })?;

        let result = intent_to_result(intent)?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            external_id = %result.external_id,
            status = %result.status,
            "Stripe webhook parsed"
        );
        Ok(result)
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self.verifier.verify(payload, signature, self.clock.now()) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Stripe webhook signature rejected");
                false
            }
        }
    }
}
