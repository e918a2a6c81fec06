//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, errors and event infrastructure
//! that form the vocabulary of the billing domain.

mod context;
mod errors;
mod events;
mod ids;
mod money;
mod state_machine;
mod timestamp;

pub use context::RequestContext;
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use events::{
    DomainEvent, EventEnvelope, EventId, EventMetadata, SerializableDomainEvent,
};
pub use ids::{AuditEntryId, PlanId, SubscriptionId, TenantId, UserId};
pub use money::{Money, MoneyError};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
