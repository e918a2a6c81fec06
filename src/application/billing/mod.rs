//! Billing use cases.
//!
//! - `SubscriptionLedger` - sole writer of subscription state
//! - `PaymentOrchestrator` - charges, webhook reconciliation, sweeps
//! - `RetryExecutor` - exponential backoff around gateway calls
//! - `AuditRecorder` - audit trail persistence
//! - `CommissionGenerator` - event handler for affiliate commissions
//! - `SubscriptionView` - read model for the presentation layer

mod audit_recorder;
mod commission;
mod errors;
mod ledger;
mod orchestrator;
mod retry;
mod view;

pub use audit_recorder::{AuditError, AuditRecorder};
pub use commission::CommissionGenerator;
pub use errors::{ChargeError, ReconcileError};
pub use ledger::{LedgerError, LedgerOutcome, OpenSubscription, SubscriptionLedger};
pub use orchestrator::{
    ChargeCommand, ChargeOutcome, PaymentOrchestrator, ReconcileOutcome, SweepReport,
};
pub use retry::{RetryExecutor, RetryPolicy, RetryableError};
pub use view::{PlanView, SubscriptionView};
