//! In-memory adapters for every persistence port.
//!
//! Used by tests and by the server when no database URL is configured.

mod affiliate_directory;
mod audit_log;
mod idempotency_store;
mod subscription_repository;

pub use affiliate_directory::InMemoryAffiliateDirectory;
pub use audit_log::InMemoryAuditLog;
pub use idempotency_store::InMemoryIdempotencyStore;
pub use subscription_repository::InMemorySubscriptionRepository;
