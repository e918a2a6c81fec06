//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing core to external systems:
//! - `events` - In-process event bus
//! - `gateway` - Payment processors (Stripe, sandbox)
//! - `http` - Webhook receiver and read endpoints (axum)
//! - `memory` - In-memory repositories for tests and local runs
//! - `postgres` - PostgreSQL repositories (sqlx)

pub mod events;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod postgres;

pub use events::InMemoryEventBus;
pub use gateway::{SandboxGateway, SandboxOutcome, StripeConfig, StripeGateway};
pub use http::{billing_router, BillingAppState};
pub use memory::{
    InMemoryAffiliateDirectory, InMemoryAuditLog, InMemoryIdempotencyStore,
    InMemorySubscriptionRepository,
};
pub use postgres::{
    run_migrations, PostgresAffiliateDirectory, PostgresAuditLogRepository,
    PostgresIdempotencyStore, PostgresSubscriptionRepository,
};
