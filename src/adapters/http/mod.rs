//! HTTP adapter - processor webhooks and read endpoints.

mod dto;
mod handlers;
mod routes;

pub use dto::{ErrorResponse, HealthResponse, WebhookAck};
pub use handlers::{BillingApiError, BillingAppState};
pub use routes::billing_router;
