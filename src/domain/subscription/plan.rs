//! Plan snapshot carried by a subscription.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Money, PlanId};

/// How often a plan bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl BillingInterval {
    /// Length of one billing period in days.
    pub fn days(&self) -> i64 {
        match self {
            BillingInterval::Monthly => 30,
            BillingInterval::Quarterly => 90,
            BillingInterval::Semiannual => 180,
            BillingInterval::Annual => 365,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.days())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Quarterly => "quarterly",
            BillingInterval::Semiannual => "semiannual",
            BillingInterval::Annual => "annual",
        }
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingInterval::Monthly),
            "quarterly" => Ok(BillingInterval::Quarterly),
            "semiannual" => Ok(BillingInterval::Semiannual),
            "annual" => Ok(BillingInterval::Annual),
            other => Err(format!("unknown billing interval '{}'", other)),
        }
    }
}

/// Snapshot of the plan at subscription time.
///
/// Price changes on the plan catalogue do not affect existing subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: PlanId,
    pub name: String,
    pub price: Money,
    pub interval: BillingInterval,
}

impl PlanSummary {
    pub fn new(id: PlanId, name: impl Into<String>, price: Money, interval: BillingInterval) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            interval,
        }
    }
}
