//! Errors returned by the payment orchestrator.

use thiserror::Error;

use super::{AuditError, LedgerError};
use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};
use crate::ports::PaymentError;

/// Why a charge (or any orchestrated subscription change) failed.
///
/// Gateway errors are returned exactly as the gateway produced them, after
/// retries are exhausted.
#[derive(Debug, Error)]
pub enum ChargeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Storage(#[from] DomainError),
}

impl ChargeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChargeError::Validation(_) => ErrorCode::ValidationFailed,
            ChargeError::Ledger(err) => err.code(),
            ChargeError::Gateway(_) => ErrorCode::GatewayError,
            ChargeError::Audit(_) => ErrorCode::AuditFailure,
            ChargeError::Storage(err) => err.code,
        }
    }
}

impl From<ChargeError> for DomainError {
    fn from(err: ChargeError) -> Self {
        match err {
            ChargeError::Validation(err) => err.into(),
            ChargeError::Ledger(err) => err.into(),
            ChargeError::Gateway(err) => err.into(),
            ChargeError::Audit(err) => err.into(),
            ChargeError::Storage(err) => err,
        }
    }
}

/// Why a webhook could not be reconciled.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The signature did not verify; nothing was read or written.
    #[error("webhook signature rejected")]
    InvalidSignature,

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Charge(#[from] ChargeError),

    #[error(transparent)]
    Storage(#[from] DomainError),
}

impl ReconcileError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReconcileError::InvalidSignature => ErrorCode::InvalidWebhookSignature,
            ReconcileError::Gateway(_) => ErrorCode::GatewayError,
            ReconcileError::Charge(err) => err.code(),
            ReconcileError::Storage(err) => err.code,
        }
    }
}

impl From<ReconcileError> for DomainError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidSignature => {
                DomainError::new(ErrorCode::InvalidWebhookSignature, "webhook signature rejected")
            }
            ReconcileError::Gateway(err) => err.into(),
            ReconcileError::Charge(err) => err.into(),
            ReconcileError::Storage(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::SubscriptionId;
    use crate::domain::subscription::SubscriptionError;

    #[test]
    fn gateway_error_message_is_preserved() {
        let err = ChargeError::from(PaymentError::timeout("gateway timed out"));
        assert_eq!(err.code(), ErrorCode::GatewayError);
        assert!(err.to_string().contains("gateway timed out"));
    }

    #[test]
    fn missing_subscription_maps_to_not_found() {
        let err = ChargeError::from(LedgerError::from(SubscriptionError::NotFound(
            SubscriptionId::new(),
        )));
        assert_eq!(err.code(), ErrorCode::SubscriptionNotFound);
        let domain: DomainError = err.into();
        assert_eq!(domain.code, ErrorCode::SubscriptionNotFound);
    }

    #[test]
    fn signature_failure_has_its_own_code() {
        assert_eq!(
            ReconcileError::InvalidSignature.code(),
            ErrorCode::InvalidWebhookSignature
        );
    }
}
