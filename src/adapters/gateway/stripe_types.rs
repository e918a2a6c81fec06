//! Stripe wire types.
//!
//! Only the fields the gateway reads are modelled; everything else in the
//! Stripe payloads is ignored by serde.

use serde::Deserialize;

/// A Stripe webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub data: StripeEventData,

    /// Whether this is a live mode event (vs test mode).
    #[serde(default)]
    pub livemode: bool,

    /// Unix timestamp when the event was created.
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Payment intent as returned by `/v1/payment_intents`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub last_payment_error: Option<StripeApiError>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl StripePaymentIntent {
    /// Idempotency key we attached when creating the intent.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.get("idempotency_key").map(String::as_str)
    }
}

/// Error object Stripe returns on failed calls and on declined intents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Present on card errors raised while confirming an intent.
    #[serde(default)]
    pub payment_intent: Option<StripePaymentIntentRef>,
}

impl StripeApiError {
    /// Most specific failure code available.
    pub fn failure_code(&self) -> &str {
        self.decline_code
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("card_declined")
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("payment declined")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntentRef {
    pub id: String,
}

/// `{"error": {...}}` body of non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    pub error: StripeApiError,
}
