//! Canonical gateway outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::Money;

/// Outcome reported by a gateway for a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Approved,
    Rejected,
    Pending,
    Failed,
}

impl PaymentStatus {
    /// Approved, rejected and failed are final; pending is not.
    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure detail from the processor.
///
/// Kept for the audit trail only; end users see a `RejectionReason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub code: String,
    pub message: String,
}

impl PaymentFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Structured, user-facing reason for a failed charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    CardDeclined,
    InsufficientFunds,
    ExpiredCard,
    InvalidPaymentDetails,
    PendingTimeout,
    ProcessingError,
}

impl RejectionReason {
    /// Maps a processor decline code onto the user-facing taxonomy.
    pub fn from_failure_code(code: &str) -> Self {
        match code {
            "insufficient_funds" => RejectionReason::InsufficientFunds,
            "expired_card" => RejectionReason::ExpiredCard,
            "incorrect_number" | "invalid_number" | "incorrect_cvc" | "invalid_cvc"
            | "invalid_expiry_month" | "invalid_expiry_year" => {
                RejectionReason::InvalidPaymentDetails
            }
            "pending_timeout" => RejectionReason::PendingTimeout,
            "card_declined" | "do_not_honor" | "generic_decline" | "lost_card" | "stolen_card"
            | "fraudulent" => RejectionReason::CardDeclined,
            _ => RejectionReason::ProcessingError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::CardDeclined => "card_declined",
            RejectionReason::InsufficientFunds => "insufficient_funds",
            RejectionReason::ExpiredCard => "expired_card",
            RejectionReason::InvalidPaymentDetails => "invalid_payment_details",
            RejectionReason::PendingTimeout => "pending_timeout",
            RejectionReason::ProcessingError => "processing_error",
        }
    }

    /// Message safe to show to the payer.
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectionReason::CardDeclined => "Your card was declined.",
            RejectionReason::InsufficientFunds => "Your card has insufficient funds.",
            RejectionReason::ExpiredCard => "Your card has expired.",
            RejectionReason::InvalidPaymentDetails => "Your payment details are invalid.",
            RejectionReason::PendingTimeout => "The payment was not confirmed in time.",
            RejectionReason::ProcessingError => "The payment could not be processed.",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Gateway-agnostic result of a charge, status query or webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    /// Processor transaction id.
    pub external_id: String,
    pub amount: Money,
    /// Present for rejected and failed results.
    pub failure: Option<PaymentFailure>,
    /// Idempotency key echoed back by the processor, when it carries one.
    pub reference: Option<String>,
}

impl PaymentResult {
    pub fn approved(external_id: impl Into<String>, amount: Money) -> Self {
        Self {
            status: PaymentStatus::Approved,
            external_id: external_id.into(),
            amount,
            failure: None,
            reference: None,
        }
    }

    pub fn pending(external_id: impl Into<String>, amount: Money) -> Self {
        Self {
            status: PaymentStatus::Pending,
            external_id: external_id.into(),
            amount,
            failure: None,
            reference: None,
        }
    }

    pub fn rejected(external_id: impl Into<String>, amount: Money, failure: PaymentFailure) -> Self {
        Self {
            status: PaymentStatus::Rejected,
            external_id: external_id.into(),
            amount,
            failure: Some(failure),
            reference: None,
        }
    }

    pub fn failed(external_id: impl Into<String>, amount: Money, failure: PaymentFailure) -> Self {
        Self {
            status: PaymentStatus::Failed,
            external_id: external_id.into(),
            amount,
            failure: Some(failure),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// User-facing reason, for rejected and failed results.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self.status {
            PaymentStatus::Rejected | PaymentStatus::Failed => Some(
                self.failure
                    .as_ref()
                    .map(|f| RejectionReason::from_failure_code(&f.code))
                    .unwrap_or(RejectionReason::ProcessingError),
            ),
            PaymentStatus::Approved | PaymentStatus::Pending => None,
        }
    }
}
