//! Axum router for the billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{get_subscription, health, receive_payment_webhook, BillingAppState};

/// Create the billing router.
///
/// # Routes
///
/// - `GET /health` - Liveness and active gateway
/// - `POST /webhooks/payments` - Processor webhooks (no auth, signature verified)
/// - `GET /subscriptions/:id` - Subscription read view
pub fn billing_router(state: BillingAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payments", post(receive_payment_webhook))
        .route("/subscriptions/:id", get(get_subscription))
        .with_state(state)
}
