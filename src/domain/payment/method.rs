//! Payment methods accepted by the gateways.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the payer settles a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    /// Instant bank transfer settled in seconds.
    Pix,
    /// Bank slip paid offline; settles asynchronously.
    Boleto,
}

impl PaymentMethod {
    /// Card methods charge a tokenized card; the others carry no token.
    pub fn requires_token(&self) -> bool {
        matches!(self, PaymentMethod::CreditCard | PaymentMethod::DebitCard)
    }

    /// Instant-settlement transfer with no card involved.
    pub fn is_instant_transfer(&self) -> bool {
        matches!(self, PaymentMethod::Pix)
    }

    /// Only credit cards may split a charge into installments.
    pub fn supports_installments(&self) -> bool {
        matches!(self, PaymentMethod::CreditCard)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Boleto => "boleto",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "debit_card" => Ok(PaymentMethod::DebitCard),
            "pix" => Ok(PaymentMethod::Pix),
            "boleto" => Ok(PaymentMethod::Boleto),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}
