//! Idempotency keys and the charge-attempt log.
//!
//! Every charge is claimed under an `IdempotencyKey` before the gateway is
//! called. The resulting `IdempotencyRecord` is the single source of truth
//! for whether a charge already happened, so retries, duplicate requests and
//! redelivered webhooks can all be detected.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PaymentFailure, PaymentMethod, PaymentResult, PaymentStatus};
use crate::domain::foundation::{
    Money, StateMachine, SubscriptionId, Timestamp, ValidationError,
};

pub const MAX_KEY_LEN: usize = 255;

/// Start date of the billing cycle being charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingPeriod(NaiveDate);

impl BillingPeriod {
    pub fn starting(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Cycle containing `now`: the first day of its UTC month.
    pub fn current(now: Timestamp) -> Self {
        let date = now.date();
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn start_date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

/// Token guaranteeing a charge has at most one real-world effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Accepts a caller-supplied key: 1..=255 printable ASCII characters.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::empty_field("idempotency_key"));
        }
        if value.len() > MAX_KEY_LEN {
            return Err(ValidationError::invalid_format(
                "idempotency_key",
                format!("must be at most {} characters", MAX_KEY_LEN),
            ));
        }
        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::invalid_format(
                "idempotency_key",
                "must be printable ASCII without spaces",
            ));
        }
        Ok(Self(value))
    }

    /// `sub_<uuid>_<yyyymmdd>`: one key per subscription per billing cycle.
    pub fn for_billing_period(subscription_id: SubscriptionId, period: BillingPeriod) -> Self {
        Self(format!("sub_{}_{}", subscription_id, period))
    }

    /// Cycle key for the charge attempt that follows `failed_attempts`
    /// declines. The first attempt uses the plain cycle key; each retry
    /// after a decline gets `_r<n>` so it reaches the processor again.
    pub fn for_charge_attempt(
        subscription_id: SubscriptionId,
        period: BillingPeriod,
        failed_attempts: u32,
    ) -> Self {
        let cycle = Self::for_billing_period(subscription_id, period);
        match failed_attempts {
            0 => cycle,
            n => Self(format!("{}_r{}", cycle.0, n)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> String {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a charge attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Claimed; the gateway call has not returned yet.
    InFlight,
    /// The processor accepted the charge but has not settled it.
    Pending,
    Approved,
    Rejected,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::InFlight => "in_flight",
            IdempotencyStatus::Pending => "pending",
            IdempotencyStatus::Approved => "approved",
            IdempotencyStatus::Rejected => "rejected",
            IdempotencyStatus::Failed => "failed",
        }
    }

    /// A final processor outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            IdempotencyStatus::Approved | IdempotencyStatus::Rejected | IdempotencyStatus::Failed
        )
    }
}

impl From<PaymentStatus> for IdempotencyStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Approved => IdempotencyStatus::Approved,
            PaymentStatus::Rejected => IdempotencyStatus::Rejected,
            PaymentStatus::Pending => IdempotencyStatus::Pending,
            PaymentStatus::Failed => IdempotencyStatus::Failed,
        }
    }
}

impl std::str::FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_flight" => Ok(IdempotencyStatus::InFlight),
            "pending" => Ok(IdempotencyStatus::Pending),
            "approved" => Ok(IdempotencyStatus::Approved),
            "rejected" => Ok(IdempotencyStatus::Rejected),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(format!("unknown idempotency status '{}'", other)),
        }
    }
}

impl StateMachine for IdempotencyStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use IdempotencyStatus::*;
        matches!(
            (self, target),
            (InFlight, Pending)
                | (InFlight, Approved)
                | (InFlight, Rejected)
                | (InFlight, Failed)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Failed)
            // Funds captured after an earlier decline report
                | (Rejected, Approved)
                | (Failed, Approved)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use IdempotencyStatus::*;
        match self {
            InFlight => vec![Pending, Approved, Rejected, Failed],
            Pending => vec![Approved, Rejected, Failed],
            Rejected | Failed => vec![Approved],
            Approved => vec![],
        }
    }
}

/// Persisted record of one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub subscription_id: SubscriptionId,
    pub status: IdempotencyStatus,
    pub external_id: Option<String>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub failure: Option<PaymentFailure>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl IdempotencyRecord {
    /// Fresh in-flight claim.
    pub fn claim(
        key: IdempotencyKey,
        subscription_id: SubscriptionId,
        amount: Money,
        method: PaymentMethod,
        now: Timestamp,
    ) -> Self {
        Self {
            key,
            subscription_id,
            status: IdempotencyStatus::InFlight,
            external_id: None,
            amount,
            method,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next version of this record after the gateway reported `result`.
    ///
    /// # Errors
    ///
    /// Fails when the move is not allowed, e.g. downgrading an approval.
    pub fn settle(&self, result: &PaymentResult, now: Timestamp) -> Result<Self, ValidationError> {
        let status = self.status.transition_to(result.status.into())?;
        Ok(Self {
            status,
            external_id: Some(result.external_id.clone()),
            amount: result.amount.clone(),
            failure: result.failure.clone(),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Version to fall back to when `settled` could not be applied to the
    /// subscription.
    ///
    /// An in-flight claim reopens as pending under the processor's id, where
    /// polling and webhooks can settle it again.
    pub fn reopen(&self, settled: &IdempotencyRecord, now: Timestamp) -> Self {
        let status = match self.status {
            IdempotencyStatus::InFlight => IdempotencyStatus::Pending,
            other => other,
        };
        Self {
            status,
            external_id: settled.external_id.clone().or_else(|| self.external_id.clone()),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Rebuilds the canonical result this record stands for.
    ///
    /// Returns `None` while the attempt is still in flight.
    pub fn to_result(&self) -> Option<PaymentResult> {
        let status = match self.status {
            IdempotencyStatus::InFlight => return None,
            IdempotencyStatus::Pending => PaymentStatus::Pending,
            IdempotencyStatus::Approved => PaymentStatus::Approved,
            IdempotencyStatus::Rejected => PaymentStatus::Rejected,
            IdempotencyStatus::Failed => PaymentStatus::Failed,
        };
        Some(PaymentResult {
            status,
            external_id: self.external_id.clone().unwrap_or_default(),
            amount: self.amount.clone(),
            failure: self.failure.clone(),
            reference: Some(self.key.to_string()),
        })
    }
}
