//! EventPublisher port - outbound side of the domain event bus.
//!
//! Publishing is best-effort from the caller's point of view: a handler
//! failure behind the publisher never rolls back the payment or ledger
//! change that produced the event.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventEnvelope};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a single event to every handler registered for its type.
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError>;

    /// Publishes events in order.
    async fn publish_all(&self, events: Vec<EventEnvelope>) -> Result<(), DomainError>;
}
