//! Courier configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. CLI flags override file values.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{GatewaySettings, Poller, GWEI};

/// Default JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default cap on simultaneous transaction-detail fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 20;

/// Default new-block polling cadence.
pub const DEFAULT_BLOCK_POLL_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_BALANCE_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_BALANCE_POLL_MAX_ATTEMPTS: u32 = 300;
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RECEIPT_POLL_MAX_ATTEMPTS: u32 = 600;

/// Default minimum top-up for a disposable wallet (0.00015 ETH).
pub const DEFAULT_FUNDING_GWEI: u64 = 150_000;

/// Default gas price bump, in percent of the current price.
pub const DEFAULT_GAS_PRICE_BUMP_PERCENT: u32 = 120;

/// Default bound on address rejection sampling.
pub const DEFAULT_ADDRESS_SEARCH_MAX_ATTEMPTS: u32 = 256;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for sending and ingesting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CourierConfig {
    /// JSON-RPC endpoint of the ledger node.
    pub rpc_url: String,

    /// Maximum simultaneous transaction-detail fetches per block.
    pub fetch_concurrency: usize,

    pub block_poll_interval_ms: u64,
    pub balance_poll_interval_ms: u64,
    pub balance_poll_max_attempts: u32,
    pub receipt_poll_interval_ms: u64,
    pub receipt_poll_max_attempts: u32,

    /// Minimum top-up sent to a disposable wallet, in gwei.
    pub funding_gwei: u64,

    /// Batch gas price = current price × bump / 100.
    pub gas_price_bump_percent: u32,

    pub address_search_max_attempts: u32,

    /// First block to scan; the chain head when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_block: Option<u64>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            block_poll_interval_ms: DEFAULT_BLOCK_POLL_INTERVAL_MS,
            balance_poll_interval_ms: DEFAULT_BALANCE_POLL_INTERVAL_MS,
            balance_poll_max_attempts: DEFAULT_BALANCE_POLL_MAX_ATTEMPTS,
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            receipt_poll_max_attempts: DEFAULT_RECEIPT_POLL_MAX_ATTEMPTS,
            funding_gwei: DEFAULT_FUNDING_GWEI,
            gas_price_bump_percent: DEFAULT_GAS_PRICE_BUMP_PERCENT,
            address_search_max_attempts: DEFAULT_ADDRESS_SEARCH_MAX_ATTEMPTS,
            start_block: None,
        }
    }
}

impl CourierConfig {
    /// Loads a TOML config file and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: CourierConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid("rpc_url is empty".to_string()));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid("fetch_concurrency must be at least 1".to_string()));
        }
        for (name, value) in [
            ("block_poll_interval_ms", self.block_poll_interval_ms),
            ("balance_poll_interval_ms", self.balance_poll_interval_ms),
            ("receipt_poll_interval_ms", self.receipt_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.balance_poll_max_attempts == 0 || self.receipt_poll_max_attempts == 0 {
            return Err(ConfigError::Invalid("poll attempt bounds must be positive".to_string()));
        }
        if self.gas_price_bump_percent < 100 {
            return Err(ConfigError::Invalid(format!(
                "gas_price_bump_percent {} is below 100",
                self.gas_price_bump_percent
            )));
        }
        if self.address_search_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "address_search_max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    /// Retry schedule for a block that is not yet visible or failed to
    /// fetch: one block interval between tries, bounded like the receipt
    /// wait.
    pub fn block_retry(&self) -> Poller {
        Poller::new(self.block_poll_interval(), self.receipt_poll_max_attempts)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            funding_wei: u128::from(self.funding_gwei) * GWEI,
            gas_price_bump_percent: self.gas_price_bump_percent,
            balance_poller: Poller::new(
                Duration::from_millis(self.balance_poll_interval_ms),
                self.balance_poll_max_attempts,
            ),
            receipt_poller: Poller::new(
                Duration::from_millis(self.receipt_poll_interval_ms),
                self.receipt_poll_max_attempts,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_gateway_defaults() {
        let config = CourierConfig::default();
        assert!(config.validate().is_ok());

        let settings = config.gateway_settings();
        let defaults = GatewaySettings::default();
        assert_eq!(settings.funding_wei, defaults.funding_wei);
        assert_eq!(settings.funding_wei, 150_000_000_000_000);
        assert_eq!(settings.gas_price_bump_percent, defaults.gas_price_bump_percent);
        assert_eq!(settings.balance_poller.max_attempts, 300);
        assert_eq!(settings.receipt_poller.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: CourierConfig = toml::from_str(
            r#"
            rpc_url = "http://node:8545"
            fetch_concurrency = 5
            start_block = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.fetch_concurrency, 5);
        assert_eq!(config.start_block, Some(100));
        assert_eq!(config.gas_price_bump_percent, DEFAULT_GAS_PRICE_BUMP_PERCENT);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_concurrency = CourierConfig {
            fetch_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(zero_concurrency.validate(), Err(ConfigError::Invalid(_))));

        let zero_interval = CourierConfig {
            receipt_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let underpriced = CourierConfig {
            gas_price_bump_percent: 99,
            ..Default::default()
        };
        assert!(underpriced.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("courier.toml");

        let config = CourierConfig {
            funding_gwei: 1,
            start_block: Some(7),
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(CourierConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("courier.toml");
        fs::write(&path, "gas_price_bump_percent = 50\n").unwrap();

        assert!(matches!(CourierConfig::load(&path), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            CourierConfig::load(&temp_dir.path().join("missing.toml")),
            Err(ConfigError::IoError(_))
        ));
    }
}
