//! Payment gateway adapters.
//!
//! - `StripeGateway` - Stripe Payment Intents
//! - `SandboxGateway` - scriptable in-process gateway for local runs and tests

mod sandbox_gateway;
mod stripe_gateway;
mod stripe_types;

pub use sandbox_gateway::{SandboxGateway, SandboxOutcome};
pub use stripe_gateway::{StripeConfig, StripeGateway};
pub use stripe_types::{StripePaymentIntent, StripeWebhookEvent};
