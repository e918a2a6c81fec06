//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid socket address: {0}")]
    InvalidSocketAddr(String),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool max_connections must be non-zero and at least min_connections")]
    InvalidPoolSize,

    #[error("Invalid Stripe API key format")]
    InvalidStripeKey,

    #[error("Invalid Stripe webhook secret format")]
    InvalidStripeWebhookSecret,

    #[error("Stripe API base URL must use HTTPS in production")]
    ApiBaseUrlMustBeHttps,

    #[error("Sandbox gateway is not allowed in production")]
    SandboxInProduction,

    #[error("Webhook tolerance must be between 1 and 3600 seconds")]
    InvalidWebhookTolerance,

    #[error("Retry max_attempts must be between 1 and 10")]
    InvalidRetryAttempts,

    #[error("Retry backoff multiplier must be at least 1.0")]
    InvalidBackoffMultiplier,

    #[error("Invalid billing interval setting: {0}")]
    InvalidBillingInterval(&'static str),

    #[error("Commission rate cannot exceed 10000 basis points")]
    InvalidCommissionRate,
}
