//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, money, errors, events)
//! - `subscription` - Subscription lifecycle state machine and billing events
//! - `payment` - Payment requests, results, idempotency and webhook signatures
//! - `audit` - Append-only audit trail entries

pub mod audit;
pub mod foundation;
pub mod payment;
pub mod subscription;
