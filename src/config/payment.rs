//! Payment configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Which processor adapter to wire at startup.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Stripe,
    #[default]
    Sandbox,
}

/// Payment configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub gateway: GatewayKind,

    /// Stripe secret API key (`sk_test_...` / `sk_live_...`)
    pub stripe_api_key: Option<SecretString>,

    /// Webhook signing secret of the active gateway
    pub webhook_secret: Option<SecretString>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Reject Stripe events that were not sent in live mode
    #[serde(default)]
    pub require_livemode: bool,

    /// Maximum accepted age of a signed webhook
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key
            .as_ref()
            .is_some_and(|key| key.expose_secret().starts_with("sk_test_"))
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key
            .as_ref()
            .is_some_and(|key| key.expose_secret().starts_with("sk_live_"))
    }

    /// Validate payment configuration
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        if !(1..=3600).contains(&self.webhook_tolerance_secs) {
            return Err(ValidationError::InvalidWebhookTolerance);
        }

        let webhook_secret = self
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .unwrap_or_default();
        if webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__WEBHOOK_SECRET"));
        }

        match self.gateway {
            GatewayKind::Sandbox => {
                if *environment == Environment::Production {
                    return Err(ValidationError::SandboxInProduction);
                }
            }
            GatewayKind::Stripe => {
                let api_key = self
                    .stripe_api_key
                    .as_ref()
                    .map(|s| s.expose_secret().as_str())
                    .unwrap_or_default();
                if api_key.is_empty() {
                    return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
                }

                // Verify key prefixes for safety
                if !api_key.starts_with("sk_") {
                    return Err(ValidationError::InvalidStripeKey);
                }
                if !webhook_secret.starts_with("whsec_") {
                    return Err(ValidationError::InvalidStripeWebhookSecret);
                }
                if *environment == Environment::Production
                    && !self.api_base_url.starts_with("https://")
                {
                    return Err(ValidationError::ApiBaseUrlMustBeHttps);
                }
            }
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayKind::default(),
            stripe_api_key: None,
            webhook_secret: None,
            api_base_url: default_api_base_url(),
            require_livemode: false,
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance() -> i64 {
    300
}
