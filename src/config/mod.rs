//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables use the `PROCURA_BILLING`
//! prefix and `__` between nested keys.
//!
//! # Example
//!
//! ```no_run
//! use procura_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod payment;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::{GatewayKind, PaymentConfig};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL storage; in-memory storage when absent
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub payment: PaymentConfig,

    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// - `PROCURA_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `PROCURA_BILLING__DATABASE__URL=...` -> `database.url = ...`
    /// - `PROCURA_BILLING__PAYMENT__GATEWAY=stripe` -> `payment.gateway`
    ///
    /// A `.env` file is read first when present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("PROCURA_BILLING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.payment.validate(&self.server.environment)?;
        self.billing.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
