//! Event bus adapters.
//!
//! - `InMemoryEventBus` - in-process bus with explicit handler registration

mod in_memory;

pub use in_memory::InMemoryEventBus;
