//! In-process domain event bus.
//!
//! Delivers each published event to the handlers registered for its type,
//! in registration order, before `publish` returns. A failing or panicking
//! handler is logged and skipped; its siblings still run and the publisher
//! never sees the failure.
//!
//! Published events are also kept in memory so tests can assert on them.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

use crate::domain::foundation::{DomainError, EventEnvelope};
use crate::ports::{EventHandler, EventPublisher, EventSubscriber};

/// In-process event bus.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryEventBus::new());
/// bus.subscribe_all(&CommissionGenerator::event_types(), Arc::new(generator));
///
/// bus.publish(envelope).await?;
/// assert!(bus.has_event("payment.processed.v1"));
/// ```
pub struct InMemoryEventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    published: RwLock<Vec<EventEnvelope>>,
    retain_published: bool,
}

impl InMemoryEventBus {
    /// Bus that keeps every published event for inspection.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            published: RwLock::new(Vec::new()),
            retain_published: true,
        }
    }

    /// Bus for long-running processes; published events are not retained.
    pub fn without_history() -> Self {
        Self {
            retain_published: false,
            ..Self::new()
        }
    }

    // === Inspection ===

    /// Returns all published events.
    pub fn published_events(&self) -> Vec<EventEnvelope> {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.published_events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Returns events for a specific aggregate.
    pub fn events_for_aggregate(&self, aggregate_id: &str) -> Vec<EventEnvelope> {
        self.published_events()
            .into_iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .collect()
    }

    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn event_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn has_event(&self, event_type: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|e| e.event_type == event_type)
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        if self.retain_published {
            self.published
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(event.clone());
        }

        // Clone handlers to release lock before await points
        let type_handlers: Vec<Arc<dyn EventHandler>> = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handlers
                .get(&event.event_type)
                .cloned()
                .unwrap_or_default()
        };

        debug!(
            event_type = %event.event_type,
            event_id = %event.event_id,
            handlers = type_handlers.len(),
            "dispatching event"
        );

        for handler in type_handlers {
            let outcome = AssertUnwindSafe(handler.handle(event.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %err,
                    "event handler failed"
                ),
                Err(_) => error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    "event handler panicked"
                ),
            }
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<EventEnvelope>) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

impl EventSubscriber for InMemoryEventBus {
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn subscribe_all(&self, event_types: &[&str], handler: Arc<dyn EventHandler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for event_type in event_types {
            handlers
                .entry(event_type.to_string())
                .or_default()
                .push(Arc::clone(&handler));
        }
    }
}
