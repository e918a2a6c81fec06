//! Billing engine configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::billing::RetryPolicy;

/// Billing engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Gateway attempts per charge, the first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Days a lapsed subscription stays usable
    #[serde(default = "default_grace_period_days")]
    pub default_grace_period_days: u32,

    /// Age at which an unresolved pending charge is given up
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Affiliate commission in basis points (1000 = 10%)
    #[serde(default = "default_commission_rate")]
    pub commission_rate_bps: u32,
}

impl BillingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.pending_timeout_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ValidationError::InvalidRetryAttempts);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidBackoffMultiplier);
        }
        if self.pending_timeout_secs == 0 || self.pending_timeout_secs > 90 * 24 * 3600 {
            return Err(ValidationError::InvalidBillingInterval("pending_timeout_secs"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidBillingInterval("sweep_interval_secs"));
        }
        if self.commission_rate_bps > 10_000 {
            return Err(ValidationError::InvalidCommissionRate);
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            default_grace_period_days: default_grace_period_days(),
            pending_timeout_secs: default_pending_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            commission_rate_bps: default_commission_rate(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_grace_period_days() -> u32 {
    7
}

fn default_pending_timeout() -> u64 {
    72 * 3600
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_commission_rate() -> u32 {
    1000
}
