use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub checkout: CheckoutConfig,
    pub integrations: IntegrationsConfig,
    pub payouts: PayoutConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub request_timeout_secs: u64,
    /// Mutating requests allowed per caller per minute
    pub rate_limit_per_minute: u32,
    /// Empty allows any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    /// Process-local state, for development and demos
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    /// Platform account holding customer funds between payment and payout
    pub escrow_user_id: Uuid,
    pub commission_rate: Decimal,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CheckoutConfig {
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub default_hold_minutes: i64,
    pub max_hold_minutes: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IntegrationsConfig {
    /// Catalog/address service; unset uses an empty in-process catalog
    pub catalog_base_url: Option<String>,
    /// Unset writes notifications to the log
    pub notification_webhook_url: Option<String>,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PayoutConfig {
    pub retry_interval_secs: u64,
    pub batch_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.bind_address", "0.0.0.0:8080")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("server.rate_limit_per_minute", 120)?
            .set_default("server.cors_origins", Vec::<String>::new())?
            .set_default("database.backend", "postgres")?
            .set_default("database.url", "postgresql://localhost/marketplace")?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.statement_timeout_ms", 5000)?
            .set_default("ledger.commission_rate", "0.10")?
            .set_default("checkout.shipping_fee", "0")?
            .set_default("checkout.discount", "0")?
            .set_default("checkout.default_hold_minutes", 30)?
            .set_default("checkout.max_hold_minutes", 24 * 60)?
            .set_default("integrations.http_timeout_secs", 10)?
            .set_default("payouts.retry_interval_secs", 60)?
            .set_default("payouts.batch_size", 50)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables, e.g. MARKETPLACE_LEDGER__COMMISSION_RATE
        builder = builder.add_source(
            Environment::with_prefix("MARKETPLACE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(bind_address) = env::var("BIND_ADDRESS") {
            builder = builder.set_override("server.bind_address", bind_address)?;
        }

        if let Ok(escrow) = env::var("ESCROW_USER_ID") {
            builder = builder.set_override("ledger.escrow_user_id", escrow)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ledger.escrow_user_id.is_nil() {
            return Err("Escrow user id must not be nil".to_string());
        }

        if self.ledger.commission_rate < Decimal::ZERO || self.ledger.commission_rate > Decimal::ONE {
            return Err("Commission rate must be between 0 and 1".to_string());
        }

        if self.checkout.shipping_fee < Decimal::ZERO || self.checkout.discount < Decimal::ZERO {
            return Err("Shipping fee and discount cannot be negative".to_string());
        }

        if self.checkout.default_hold_minutes <= 0
            || self.checkout.default_hold_minutes > self.checkout.max_hold_minutes
        {
            return Err("Default hold must be positive and within the maximum hold".to_string());
        }

        if self.database.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.payouts.batch_size <= 0 || self.payouts.retry_interval_secs == 0 {
            return Err("Payout batch size and retry interval must be positive".to_string());
        }

        if self.server.rate_limit_per_minute == 0 {
            return Err("Rate limit must allow at least one request".to_string());
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.integrations.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Config {
        Config {
            server: ServerConfig {
                bind_address: "127.0.0.1:0".to_string(),
                request_timeout_secs: 30,
                rate_limit_per_minute: 60,
                cors_origins: Vec::new(),
            },
            database: DatabaseConfig {
                backend: StoreBackend::Memory,
                url: String::new(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout_secs: 5,
                statement_timeout_ms: 5000,
            },
            ledger: LedgerConfig {
                escrow_user_id: Uuid::new_v4(),
                commission_rate: dec!(0.10),
            },
            checkout: CheckoutConfig {
                shipping_fee: dec!(0),
                discount: dec!(0),
                default_hold_minutes: 30,
                max_hold_minutes: 1440,
            },
            integrations: IntegrationsConfig {
                catalog_base_url: None,
                notification_webhook_url: None,
                http_timeout_secs: 10,
            },
            payouts: PayoutConfig {
                retry_interval_secs: 60,
                batch_size: 50,
            },
        }
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = sample();
        config.ledger.commission_rate = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = sample();
        config.ledger.escrow_user_id = Uuid::nil();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.database.backend = StoreBackend::Postgres;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.checkout.default_hold_minutes = 2000;
        assert!(config.validate().is_err());
    }
}
