//! Response bodies for the billing HTTP endpoints.

use serde::Serialize;

use crate::application::billing::ReconcileOutcome;

/// Error body returned on every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

/// Acknowledgement sent back to the processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    /// `applied`, `already_reconciled`, `unknown_subject` or `ignored`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
}

impl From<&ReconcileOutcome> for WebhookAck {
    fn from(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Applied(charge) => WebhookAck {
                outcome: "applied",
                external_id: charge.result().map(|r| r.external_id.clone()),
                payment_status: charge.payment_status().map(|s| s.to_string()),
            },
            ReconcileOutcome::AlreadyReconciled { external_id } => WebhookAck {
                outcome: "already_reconciled",
                external_id: Some(external_id.clone()),
                payment_status: None,
            },
            ReconcileOutcome::UnknownSubject { external_id } => WebhookAck {
                outcome: "unknown_subject",
                external_id: Some(external_id.clone()),
                payment_status: None,
            },
            ReconcileOutcome::Ignored { .. } => WebhookAck {
                outcome: "ignored",
                external_id: None,
                payment_status: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub gateway: &'static str,
}
