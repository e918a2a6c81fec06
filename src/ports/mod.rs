//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing core and the outside world. Adapters implement these ports.
//!
//! ## Payment Ports
//!
//! - `PaymentGateway` - One adapter per payment processor
//! - `IdempotencyStore` - Charge-attempt log with atomic claim/complete
//!
//! ## Persistence Ports
//!
//! - `SubscriptionRepository` - Subscription aggregates with conditional writes
//! - `AuditLogRepository` - Append-only audit trail
//! - `AffiliateDirectory` - Referral lookups for commission generation
//!
//! ## Event Ports
//!
//! - `EventPublisher` - Port for publishing domain events
//! - `EventSubscriber` - Port for subscribing to domain events
//! - `EventHandler` - Handler that processes incoming events
//!
//! ## Time
//!
//! - `Clock` - Injected source of the current instant

mod affiliate_directory;
mod audit_log_repository;
mod clock;
mod event_publisher;
mod event_subscriber;
mod idempotency_store;
mod payment_gateway;
mod subscription_repository;

pub use affiliate_directory::AffiliateDirectory;
pub use audit_log_repository::AuditLogRepository;
pub use clock::{Clock, SystemClock};
pub use event_publisher::EventPublisher;
pub use event_subscriber::{EventBus, EventHandler, EventSubscriber};
pub use idempotency_store::{ClaimOutcome, CompletionOutcome, IdempotencyStore};
pub use payment_gateway::{PaymentError, PaymentErrorCode, PaymentGateway};
pub use subscription_repository::{SubscriptionRepository, WriteOutcome};
