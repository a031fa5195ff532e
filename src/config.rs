//! Configuration for the wallet ledger.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Names a TOML file to load before applying the other overrides.
pub const CONFIG_PATH_VAR: &str = "WALLET_LEDGER_CONFIG";
pub const MAX_RETRIES_VAR: &str = "WALLET_LEDGER_MAX_RETRIES";
pub const STORAGE_TIMEOUT_VAR: &str = "WALLET_LEDGER_STORAGE_TIMEOUT_MS";
pub const HISTORY_MAX_LIMIT_VAR: &str = "WALLET_LEDGER_HISTORY_MAX_LIMIT";
pub const STORAGE_BACKEND_VAR: &str = "WALLET_LEDGER_STORAGE_BACKEND";
pub const STORAGE_PATH_VAR: &str = "WALLET_LEDGER_STORAGE_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
}

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub history: HistoryConfig,
    pub storage: StorageConfig,
    /// Asset catalog registered at start-up
    pub assets: Vec<AssetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            history: HistoryConfig::default(),
            storage: StorageConfig::default(),
            assets: vec![
                AssetConfig::new("GOLD", "Gold Coins", 0),
                AssetConfig::new("DIAMONDS", "Diamonds", 0),
                AssetConfig::new("LOYALTY_POINTS", "Loyalty Points", 0),
            ],
        }
    }
}

/// Mutation protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts of the read-compute-commit cycle before giving up on a contended wallet
    pub max_retries: u32,

    /// Deadline for every individual storage call (milliseconds)
    pub storage_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            storage_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

/// History pagination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_limit: usize,
    /// Hard cap on page size, whatever the caller asks for
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// Where wallets and transactions live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; gone when the process exits
    #[default]
    Memory,
    /// A SQLite database file at `storage.path`
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file, used by the sqlite backend
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("wallet-ledger.db"),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub decimals: u8,
}

impl AssetConfig {
    pub fn new(code: &str, name: &str, decimals: u8) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            decimals,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variables; the file named by
    /// [`CONFIG_PATH_VAR`] is read first, then individual overrides apply.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(value) = lookup(MAX_RETRIES_VAR) {
            config.engine.max_retries = parse_var(MAX_RETRIES_VAR, &value)?;
        }
        if let Some(value) = lookup(STORAGE_TIMEOUT_VAR) {
            config.engine.storage_timeout_ms = parse_var(STORAGE_TIMEOUT_VAR, &value)?;
        }
        if let Some(value) = lookup(HISTORY_MAX_LIMIT_VAR) {
            config.history.max_limit = parse_var(HISTORY_MAX_LIMIT_VAR, &value)?;
        }
        if let Some(value) = lookup(STORAGE_BACKEND_VAR) {
            config.storage.backend = parse_var(STORAGE_BACKEND_VAR, &value)?;
        }
        if let Some(value) = lookup(STORAGE_PATH_VAR) {
            config.storage.path = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Precision of each configured asset, keyed by upper-cased code
    pub fn asset_decimals(&self) -> HashMap<String, u8> {
        self.assets
            .iter()
            .map(|a| (a.code.trim().to_ascii_uppercase(), a.decimals))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &str, value: String| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        };
        if self.engine.max_retries == 0 {
            return Err(invalid("engine.max_retries", "0".to_string()));
        }
        if self.engine.storage_timeout_ms == 0 {
            return Err(invalid("engine.storage_timeout_ms", "0".to_string()));
        }
        if self.history.max_limit == 0 {
            return Err(invalid("history.max_limit", "0".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(invalid("storage.max_connections", "0".to_string()));
        }
        if let Some(asset) = self
            .assets
            .iter()
            .find(|a| a.decimals > crate::amount::MAX_DECIMALS)
        {
            return Err(invalid(
                &format!("assets.{}.decimals", asset.code),
                asset.decimals.to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}
