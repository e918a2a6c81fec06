//! Validated payment request.
//!
//! A `PaymentRequest` can only exist in a valid state: every field is
//! checked once when it is built from a `PaymentRequestDraft`, and it is
//! immutable afterwards.

use serde::Serialize;
use std::collections::BTreeMap;

use super::PaymentMethod;
use crate::domain::foundation::{Money, ValidationError};

pub const MAX_DESCRIPTION_LEN: usize = 255;
pub const MIN_INSTALLMENTS: u8 = 1;
pub const MAX_INSTALLMENTS: u8 = 12;

/// Unvalidated input for a payment request.
#[derive(Debug, Clone)]
pub struct PaymentRequestDraft {
    pub amount: Money,
    pub description: String,
    pub payer_email: String,
    pub payer_tax_id: Option<String>,
    pub method: PaymentMethod,
    pub token: Option<String>,
    pub installments: u8,
    pub reference: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequestDraft {
    /// Draft with defaults: one installment, no tax id, no metadata.
    pub fn new(
        amount: Money,
        description: impl Into<String>,
        payer_email: impl Into<String>,
        method: PaymentMethod,
    ) -> Self {
        Self {
            amount,
            description: description.into(),
            payer_email: payer_email.into(),
            payer_tax_id: None,
            method,
            token: None,
            installments: MIN_INSTALLMENTS,
            reference: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.payer_tax_id = Some(tax_id.into());
        self
    }

    pub fn with_installments(mut self, installments: u8) -> Self {
        self.installments = installments;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<PaymentRequest, ValidationError> {
        PaymentRequest::try_from(self)
    }
}

/// A charge the orchestrator may hand to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    amount: Money,
    description: String,
    payer_email: String,
    payer_tax_id: Option<String>,
    method: PaymentMethod,
    token: Option<String>,
    installments: u8,
    reference: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl PaymentRequest {
    /// Card charge. `token` is the gateway's tokenized card.
    pub fn card(
        amount: Money,
        description: impl Into<String>,
        payer_email: impl Into<String>,
        token: impl Into<String>,
        installments: u8,
    ) -> Result<Self, ValidationError> {
        PaymentRequestDraft::new(amount, description, payer_email, PaymentMethod::CreditCard)
            .with_token(token)
            .with_installments(installments)
            .build()
    }

    /// Instant transfer charge.
    pub fn pix(
        amount: Money,
        description: impl Into<String>,
        payer_email: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        PaymentRequestDraft::new(amount, description, payer_email, PaymentMethod::Pix).build()
    }

    /// Bank slip charge; the payer tax id is printed on the slip.
    pub fn boleto(
        amount: Money,
        description: impl Into<String>,
        payer_email: impl Into<String>,
        payer_tax_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        PaymentRequestDraft::new(amount, description, payer_email, PaymentMethod::Boleto)
            .with_tax_id(payer_tax_id)
            .build()
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn payer_email(&self) -> &str {
        &self.payer_email
    }

    /// Digits-only CPF (11) or CNPJ (14).
    pub fn payer_tax_id(&self) -> Option<&str> {
        self.payer_tax_id.as_deref()
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn installments(&self) -> u8 {
        self.installments
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl TryFrom<PaymentRequestDraft> for PaymentRequest {
    type Error = ValidationError;

    fn try_from(draft: PaymentRequestDraft) -> Result<Self, Self::Error> {
        if !draft.amount.is_positive() {
            return Err(ValidationError::invalid_format(
                "amount",
                "must be greater than zero",
            ));
        }

        let description = draft.description.trim().to_string();
        if description.is_empty() {
            return Err(ValidationError::empty_field("description"));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::invalid_format(
                "description",
                format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
            ));
        }

        let payer_email = draft.payer_email.trim().to_ascii_lowercase();
        validate_email(&payer_email)?;

        let payer_tax_id = draft
            .payer_tax_id
            .as_deref()
            .map(normalize_tax_id)
            .transpose()?;

        let token = draft.token.filter(|t| !t.trim().is_empty());
        match (draft.method.requires_token(), token.is_some()) {
            (true, false) => return Err(ValidationError::empty_field("token")),
            (false, true) => {
                return Err(ValidationError::invalid_format(
                    "token",
                    format!("must be absent for {}", draft.method),
                ))
            }
            _ => {}
        }

        if !(MIN_INSTALLMENTS..=MAX_INSTALLMENTS).contains(&draft.installments) {
            return Err(ValidationError::out_of_range(
                "installments",
                i64::from(MIN_INSTALLMENTS),
                i64::from(MAX_INSTALLMENTS),
                i64::from(draft.installments),
            ));
        }
        if draft.installments > 1 && !draft.method.supports_installments() {
            return Err(ValidationError::invalid_format(
                "installments",
                format!("{} does not support installments", draft.method),
            ));
        }

        Ok(Self {
            amount: draft.amount,
            description,
            payer_email,
            payer_tax_id,
            method: draft.method,
            token,
            installments: draft.installments,
            reference: draft.reference,
            metadata: draft.metadata,
        })
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::invalid_format("payer_email", reason);

    if email.is_empty() {
        return Err(ValidationError::empty_field("payer_email"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    let (local, domain) = email.split_once('@').ok_or_else(|| invalid("missing @"))?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid("malformed local part"));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid("malformed domain"));
    }
    Ok(())
}

/// Strips punctuation and checks for CPF (11) or CNPJ (14) digits.
fn normalize_tax_id(raw: &str) -> Result<String, ValidationError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
        .collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::invalid_format(
            "payer_tax_id",
            "must contain only digits",
        ));
    }
    match digits.len() {
        11 | 14 => Ok(digits),
        n => Err(ValidationError::invalid_format(
            "payer_tax_id",
            format!("expected 11 or 14 digits, got {}", n),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brl(amount: i64) -> Money {
        Money::new(amount, "BRL").unwrap()
    }

    fn draft(method: PaymentMethod) -> PaymentRequestDraft {
        PaymentRequestDraft::new(brl(4990), "Plano Profissional", "buyer@example.com", method)
    }

    #[test]
    fn card_request_builds() {
        let request =
            PaymentRequest::card(brl(4990), "Plano", "Buyer@Example.com", "tok_visa", 3).unwrap();
        assert_eq!(request.method(), PaymentMethod::CreditCard);
        assert_eq!(request.installments(), 3);
        assert_eq!(request.payer_email(), "buyer@example.com");
        assert_eq!(request.token(), Some("tok_visa"));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let err = PaymentRequest::pix(brl(0), "Plano", "buyer@example.com").unwrap_err();
        assert_eq!(err.field(), "amount");
    }

    #[test]
    fn card_without_token_is_rejected() {
        let err = draft(PaymentMethod::DebitCard).build().unwrap_err();
        assert_eq!(err, ValidationError::empty_field("token"));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let err = draft(PaymentMethod::CreditCard).with_token("   ").build().unwrap_err();
        assert_eq!(err.field(), "token");
    }

    #[test]
    fn boleto_with_token_is_rejected() {
        let err = draft(PaymentMethod::Boleto).with_token("tok").build().unwrap_err();
        assert_eq!(err.field(), "token");
    }

    #[test]
    fn installments_out_of_range_are_rejected() {
        for installments in [0, 13] {
            let err = draft(PaymentMethod::CreditCard)
                .with_token("tok")
                .with_installments(installments)
                .build()
                .unwrap_err();
            assert!(matches!(err, ValidationError::OutOfRange { .. }));
        }
    }

    #[test]
    fn debit_card_cannot_split() {
        let err = draft(PaymentMethod::DebitCard)
            .with_token("tok")
            .with_installments(2)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), "installments");
    }

    #[test]
    fn empty_description_is_rejected() {
        let mut d = draft(PaymentMethod::Pix);
        d.description = "   ".to_string();
        assert_eq!(
            d.build().unwrap_err(),
            ValidationError::empty_field("description")
        );
    }

    #[test]
    fn long_description_is_rejected() {
        let mut d = draft(PaymentMethod::Pix);
        d.description = "x".repeat(MAX_DESCRIPTION_LEN + 1);
        assert_eq!(d.build().unwrap_err().field(), "description");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for email in ["", "no-at.example.com", "@example.com", "a@b", "a@@b.com", "a b@c.com", "a@.com"] {
            let mut d = draft(PaymentMethod::Pix);
            d.payer_email = email.to_string();
            assert!(d.build().is_err(), "{} should be rejected", email);
        }
    }

    #[test]
    fn tax_id_is_normalized_to_digits() {
        let request = PaymentRequest::boleto(brl(100), "Plano", "a@b.com", "123.456.789-09").unwrap();
        assert_eq!(request.payer_tax_id(), Some("12345678909"));

        let cnpj = PaymentRequest::boleto(brl(100), "Plano", "a@b.com", "12.345.678/0001-95").unwrap();
        assert_eq!(cnpj.payer_tax_id(), Some("12345678000195"));
    }

    #[test]
    fn tax_id_with_wrong_length_is_rejected() {
        let err = PaymentRequest::boleto(brl(100), "Plano", "a@b.com", "1234").unwrap_err();
        assert_eq!(err.field(), "payer_tax_id");
    }

    #[test]
    fn reference_and_metadata_are_kept() {
        let request = draft(PaymentMethod::Pix)
            .with_reference("order-7")
            .with_metadata("tenant", "3")
            .build()
            .unwrap();
        assert_eq!(request.reference(), Some("order-7"));
        assert_eq!(request.metadata().get("tenant").map(String::as_str), Some("3"));
    }

    proptest! {
        #[test]
        fn instant_transfer_rejects_any_token(
            amount in 1i64..10_000_000,
            token in "[a-z0-9_]{1,24}",
        ) {
            let result = PaymentRequestDraft::new(brl(amount), "Plano", "buyer@example.com", PaymentMethod::Pix)
                .with_token(token)
                .build();
            prop_assert!(result.is_err());
        }

        #[test]
        fn instant_transfer_rejects_installments(
            amount in 1i64..10_000_000,
            installments in 2u8..=12,
        ) {
            let result = PaymentRequestDraft::new(brl(amount), "Plano", "buyer@example.com", PaymentMethod::Pix)
                .with_installments(installments)
                .build();
            prop_assert!(result.is_err());
        }

        #[test]
        fn credit_card_accepts_all_valid_installments(installments in 1u8..=12) {
            let result = PaymentRequest::card(brl(4990), "Plano", "buyer@example.com", "tok", installments);
            prop_assert!(result.is_ok());
        }
    }
}
