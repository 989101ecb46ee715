use axum::http::HeaderValue;
use config::{ConfigError, Environment};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::settlement::totals::{TaxPolicy, MAX_SCALE};
use crate::settlement::EngineConfig;

/// Which backing store the engine runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub store: StoreKind,
    /// JSON ledger/directory seed, memory store only
    pub seed_file: Option<String>,
    pub max_connections: u32,
    pub tx_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub tax_rate: Decimal,
    pub amount_scale: u32,
    pub auto_invoice_numbers: bool,
    pub invoice_prefix: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Comma separated allowed origins; empty allows any
    pub cors_origins: String,
}

impl Config {
    /// Defaults, overridden by `SETTLEMENT_*` variables. `DATABASE_URL` is honoured too.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::with_prefix("SETTLEMENT"))
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/settlement".to_string());

        let config: Config = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("database_url", database_url)?
            .set_default("store", "postgres")?
            .set_default("max_connections", 20)?
            .set_default("tx_timeout_ms", 5000)?
            .set_default("request_timeout_ms", 15000)?
            .set_default("tax_rate", "0.1")?
            .set_default("amount_scale", 0)?
            .set_default("auto_invoice_numbers", true)?
            .set_default("invoice_prefix", "INV")?
            .set_default("default_page_size", 20)?
            .set_default("max_page_size", 200)?
            .set_default("cors_origins", "")?
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE {
            return Err(ConfigError::Message(format!(
                "tax_rate must be within [0, 1], got {}",
                self.tax_rate
            )));
        }
        if self.amount_scale > MAX_SCALE {
            return Err(ConfigError::Message(format!(
                "amount_scale must be at most {}, got {}",
                MAX_SCALE, self.amount_scale
            )));
        }
        if self.tx_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Message("timeouts must be greater than zero".to_string()));
        }
        if self.max_page_size == 0 || self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Message(format!(
                "page sizes must satisfy 0 < default ({}) <= max ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        if let Some(bad) = self
            .cors_origins()
            .iter()
            .find(|origin| origin.parse::<HeaderValue>().is_err())
        {
            return Err(ConfigError::Message(format!("invalid CORS origin {:?}", bad)));
        }
        if self.invoice_prefix.trim().is_empty() {
            return Err(ConfigError::Message("invoice_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tax: TaxPolicy {
                default_rate: self.tax_rate,
                scale: self.amount_scale,
            },
            tx_timeout: self.tx_timeout(),
            auto_invoice_numbers: self.auto_invoice_numbers,
            invoice_prefix: self.invoice_prefix.clone(),
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}
