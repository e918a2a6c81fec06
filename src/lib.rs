//! Procura Billing - subscription lifecycle and payment processing engine
//!
//! Charges subscriptions through a payment processor, reconciles the
//! processor's asynchronous webhooks, and keeps each subscription's state
//! machine, idempotency log, and audit trail consistent under retries and
//! concurrent writers.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
