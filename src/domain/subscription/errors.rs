//! Subscription-specific error types.

use thiserror::Error;

use super::SubscriptionStatus;
use crate::domain::foundation::{
    DomainError, ErrorCode, MoneyError, SubscriptionId, Timestamp, ValidationError,
};

/// Errors raised by the subscription aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscription {0} not found")]
    NotFound(SubscriptionId),

    #[error("cannot {operation} a subscription in status '{from}'")]
    InvalidTransition {
        from: SubscriptionStatus,
        operation: &'static str,
    },

    #[error("a subscription must start as trial or pending, got '{0}'")]
    InvalidInitialStatus(SubscriptionStatus),

    #[error("period end {end} is before period start {start}")]
    InvalidPeriod { start: Timestamp, end: Timestamp },

    #[error("subscription is still within its period or grace window")]
    NotYetExpired,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl SubscriptionError {
    pub fn invalid_transition(from: SubscriptionStatus, operation: &'static str) -> Self {
        SubscriptionError::InvalidTransition { from, operation }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::NotFound(_) => ErrorCode::SubscriptionNotFound,
            SubscriptionError::InvalidTransition { .. }
            | SubscriptionError::InvalidInitialStatus(_)
            | SubscriptionError::NotYetExpired => ErrorCode::InvalidStateTransition,
            SubscriptionError::InvalidPeriod { .. }
            | SubscriptionError::Validation(_)
            | SubscriptionError::Money(_) => ErrorCode::ValidationFailed,
        }
    }
}

impl From<SubscriptionError> for DomainError {
    fn from(err: SubscriptionError) -> Self {
        DomainError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_status_and_operation() {
        let err = SubscriptionError::invalid_transition(SubscriptionStatus::Expired, "approve");
        assert_eq!(
            err.to_string(),
            "cannot approve a subscription in status 'expired'"
        );
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    }

    #[test]
    fn converts_to_domain_error() {
        let id = SubscriptionId::new();
        let err: DomainError = SubscriptionError::NotFound(id).into();
        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
        assert!(err.message.contains(&id.to_string()));
    }
}
