//! EventSubscriber port - explicit handler registration.
//!
//! Consumers are registered by event type at startup, so the set of
//! handlers for a given billing event is visible in one place.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, EventEnvelope};

/// Side-effect handler for published events.
///
/// Handlers react to facts; they must not mutate the aggregate that
/// emitted the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EventEnvelope) -> Result<(), DomainError>;

    /// Name used in logs when the handler fails.
    fn name(&self) -> &'static str;
}

pub trait EventSubscriber: Send + Sync {
    /// Registers `handler` for `event_type`. Handlers run in registration order.
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);

    fn subscribe_all(&self, event_types: &[&str], handler: Arc<dyn EventHandler>);
}

/// Publisher and subscriber in one.
pub trait EventBus: super::EventPublisher + EventSubscriber {}

impl<T: super::EventPublisher + EventSubscriber> EventBus for T {}
