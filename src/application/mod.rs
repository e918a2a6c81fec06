//! Application layer - use cases that coordinate the domain and the ports.
//!
//! Services here own no I/O of their own; every external effect goes
//! through a port injected at construction.

pub mod billing;

pub use billing::{
    AuditError, AuditRecorder, ChargeCommand, ChargeError, ChargeOutcome, CommissionGenerator,
    LedgerError, LedgerOutcome, OpenSubscription, PaymentOrchestrator, ReconcileError,
    ReconcileOutcome, RetryExecutor, RetryPolicy, SubscriptionLedger, SubscriptionView,
    SweepReport,
};
