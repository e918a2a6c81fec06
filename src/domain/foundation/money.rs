//! Fixed-point currency value.
//!
//! Amounts are kept in integer minor units (cents) with an ISO-4217 shaped
//! currency code. Arithmetic never produces a negative amount.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by `Money` construction and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount cannot be negative: {0}")]
    NegativeAmount(i64),

    #[error("invalid currency code '{0}': expected three ASCII letters")]
    InvalidCurrency(String),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("arithmetic overflow")]
    Overflow,
}

/// Immutable monetary amount.
///
/// Equality and hashing are by `(amount_minor, currency)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    amount_minor: i64,
    currency: String,
}

#[derive(Serialize, Deserialize)]
struct MoneyRepr {
    amount_minor: i64,
    currency: String,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(repr.amount_minor, &repr.currency)
    }
}

impl From<Money> for MoneyRepr {
    fn from(money: Money) -> Self {
        MoneyRepr {
            amount_minor: money.amount_minor,
            currency: money.currency,
        }
    }
}

impl Money {
    /// Creates a monetary amount in minor units.
    pub fn new(amount_minor: i64, currency: &str) -> Result<Self, MoneyError> {
        if amount_minor < 0 {
            return Err(MoneyError::NegativeAmount(amount_minor));
        }
        let currency = currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(currency.to_string()));
        }
        Ok(Self {
            amount_minor,
            currency: currency.to_ascii_uppercase(),
        })
    }

    /// Zero in the given currency.
    pub fn zero(currency: &str) -> Result<Self, MoneyError> {
        Self::new(0, currency)
    }

    /// Amount in minor units.
    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    /// Uppercase currency code.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Zero in this amount's currency.
    pub fn zeroed(&self) -> Money {
        self.with_amount(0)
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(self.with_amount(amount))
    }

    /// Subtracts, rejecting results below zero.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_sub(other.amount_minor)
            .ok_or(MoneyError::Overflow)?;
        if amount < 0 {
            return Err(MoneyError::NegativeAmount(amount));
        }
        Ok(self.with_amount(amount))
    }

    pub fn multiply(&self, factor: u32) -> Result<Money, MoneyError> {
        let amount = self
            .amount_minor
            .checked_mul(i64::from(factor))
            .ok_or(MoneyError::Overflow)?;
        Ok(self.with_amount(amount))
    }

    /// Share of this amount in basis points (1/100 of a percent), rounded down.
    pub fn percentage_bps(&self, bps: u32) -> Result<Money, MoneyError> {
        let scaled = i128::from(self.amount_minor) * i128::from(bps) / 10_000;
        let amount = i64::try_from(scaled).map_err(|_| MoneyError::Overflow)?;
        Ok(self.with_amount(amount))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }

    fn with_amount(&self, amount_minor: i64) -> Money {
        Money {
            amount_minor,
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_minor / 100,
            self.amount_minor % 100,
            self.currency
        )
    }
}
