//! Payment domain module.
//!
//! Gateway-agnostic vocabulary for charging a subscription: what is charged
//! (`PaymentRequest`), what came back (`PaymentResult`), and how repeated
//! attempts are recognized (`IdempotencyKey`, `IdempotencyRecord`).
//!
//! # Module Structure
//!
//! - `method` - Accepted payment methods and their rules
//! - `request` - Validated charge request
//! - `result` - Canonical outcome and user-facing rejection reasons
//! - `idempotency` - Keys, billing periods and the charge-attempt log
//! - `signature` - HMAC webhook signature verification

mod idempotency;
mod method;
mod request;
mod result;
mod signature;

pub use idempotency::{
    BillingPeriod, IdempotencyKey, IdempotencyRecord, IdempotencyStatus, MAX_KEY_LEN,
};
pub use method::PaymentMethod;
pub use request::{
    PaymentRequest, PaymentRequestDraft, MAX_DESCRIPTION_LEN, MAX_INSTALLMENTS, MIN_INSTALLMENTS,
};
pub use result::{PaymentFailure, PaymentResult, PaymentStatus, RejectionReason};
pub use signature::{
    hmac_sha256, sign_hex, verify_hex_signature, SignatureError, TimestampedSignature,
    TimestampedSignatureVerifier, DEFAULT_TOLERANCE_SECS,
};
