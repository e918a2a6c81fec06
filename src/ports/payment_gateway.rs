//! Payment gateway port for external payment processing.
//!
//! One adapter per processor; the active adapter is chosen from
//! configuration at startup.
//!
//! # Design
//!
//! - **Gateway agnostic**: canonical `PaymentRequest` in, `PaymentResult` out
//! - **Idempotent**: `process_payment` twice with the same key charges once
//! - **Declines are results**: a declined card is a `Rejected` result, not an
//!   error; errors are reserved for transport and protocol failures

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::payment::{IdempotencyKey, PaymentRequest, PaymentResult};

/// Capability set every payment processor adapter provides.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short adapter name for logs ("stripe", "sandbox").
    fn name(&self) -> &'static str;

    /// HTTP header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Charges `request` under `key`.
    ///
    /// Calling twice with the same key must return the same result without
    /// a second real-world charge.
    async fn process_payment(
        &self,
        request: &PaymentRequest,
        key: &IdempotencyKey,
    ) -> Result<PaymentResult, PaymentError>;

    /// Current state of a charge. Fails with `NotFound` if unknown.
    async fn get_payment_status(&self, external_id: &str) -> Result<PaymentResult, PaymentError>;

    /// Parses a processor webhook into the canonical result.
    ///
    /// Only call after `validate_webhook_signature` returned true.
    async fn process_webhook(&self, payload: &[u8]) -> Result<PaymentResult, PaymentError>;

    /// Verifies the webhook signature over the raw payload.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// Error from a gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// Processor's own error code, if it sent one.
    pub provider_code: Option<String>,
    /// Whether retrying the same call may succeed.
    pub retryable: bool,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ProviderUnavailable, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn invalid_webhook(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidWebhook, message)
    }

    pub fn unsupported_event(event_type: &str) -> Self {
        Self::new(
            PaymentErrorCode::UnsupportedEvent,
            format!("event type '{}' carries no payment outcome", event_type),
        )
    }
}

impl From<PaymentError> for DomainError {
    fn from(err: PaymentError) -> Self {
        let code = match err.code {
            PaymentErrorCode::NotFound => ErrorCode::NotFound,
            PaymentErrorCode::InvalidWebhook | PaymentErrorCode::UnsupportedEvent => {
                ErrorCode::ValidationFailed
            }
            _ => ErrorCode::GatewayError,
        };
        let mut domain = DomainError::new(code, err.message);
        if let Some(provider_code) = err.provider_code {
            domain = domain.with_detail("provider_code", provider_code);
        }
        domain
    }
}

/// Gateway error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Connection refused, reset or DNS failure.
    NetworkError,
    /// No response within the deadline.
    Timeout,
    /// Processor answered with a 5xx.
    ProviderUnavailable,
    /// Processor throttled us.
    RateLimitExceeded,
    /// API credentials rejected.
    AuthenticationError,
    /// Processor refused the request shape.
    InvalidRequest,
    NotFound,
    /// Webhook body could not be parsed.
    InvalidWebhook,
    /// Webhook is well-formed but not about a payment outcome.
    UnsupportedEvent,
    /// Other processor-side error.
    ProviderError,
    Unknown,
}

impl PaymentErrorCode {
    /// Transient categories the retry executor may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::ProviderUnavailable
                | PaymentErrorCode::RateLimitExceeded
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::ProviderUnavailable => "provider_unavailable",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::InvalidWebhook => "invalid_webhook",
            PaymentErrorCode::UnsupportedEvent => "unsupported_event",
            PaymentErrorCode::ProviderError => "provider_error",
            PaymentErrorCode::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn PaymentGateway) {}

    #[test]
    fn transient_codes_are_retryable() {
        for code in [
            PaymentErrorCode::NetworkError,
            PaymentErrorCode::Timeout,
            PaymentErrorCode::ProviderUnavailable,
            PaymentErrorCode::RateLimitExceeded,
        ] {
            assert!(PaymentError::new(code, "x").retryable, "{}", code);
        }
    }

    #[test]
    fn permanent_codes_are_not_retryable() {
        for code in [
            PaymentErrorCode::AuthenticationError,
            PaymentErrorCode::InvalidRequest,
            PaymentErrorCode::NotFound,
            PaymentErrorCode::InvalidWebhook,
        ] {
            assert!(!PaymentError::new(code, "x").retryable, "{}", code);
        }
    }

    #[test]
    fn displays_code_and_message() {
        let err = PaymentError::timeout("no answer in 10s");
        assert_eq!(err.to_string(), "timeout: no answer in 10s");
    }

    #[test]
    fn converts_to_domain_error_with_provider_code() {
        let err: DomainError = PaymentError::unavailable("502").with_provider_code("api_error").into();
        assert_eq!(err.code, ErrorCode::GatewayError);
        assert_eq!(err.details.get("provider_code").map(String::as_str), Some("api_error"));

        let not_found: DomainError = PaymentError::not_found("payment_intent").into();
        assert_eq!(not_found.code, ErrorCode::NotFound);
    }
}
