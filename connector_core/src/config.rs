//! Connector configuration.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY};

/// File name searched for by [`ConnectorConfig::from_project_root`].
pub const CONFIG_FILE_NAME: &str = "Connector.toml";

/// Setting naming the sample asset's path.
pub const ASSET_PATH_SETTING: &str = "connector.asset.path";

/// Older name of [`ASSET_PATH_SETTING`], still honoured when the new key is
/// absent.
pub const LEGACY_ASSET_PATH_SETTING: &str = "edc.samples.04.asset.path";

/// Used when neither asset path setting is present.
pub const DEFAULT_ASSET_PATH: &str = "/tmp/provider/test-document.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per part read from file sources.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Scope used when evaluating a contract's policy before a transfer.
    pub scope: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            scope: "transfer".to_string(),
        }
    }
}

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub log_level: String,
    pub executor: ExecutorConfig,
    pub transfer: TransferConfig,
    pub policy: PolicyConfig,
    /// Free-form settings read by extensions.
    pub settings: HashMap<String, String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            executor: ExecutorConfig::default(),
            transfer: TransferConfig::default(),
            policy: PolicyConfig::default(),
            settings: HashMap::new(),
        }
    }
}

impl ConnectorConfig {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(config_path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look for `Connector.toml` in the current directory and its parents,
    /// falling back to the defaults when none exists.
    pub fn from_project_root() -> Result<Self, ConfigError> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(config_path);
            }

            if !current_dir.pop() {
                break;
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.policy.scope.trim().is_empty() {
            return Err(ConfigError::Invalid("policy.scope must not be empty".to_string()));
        }
        Ok(())
    }

    /// A named setting, or `default` when absent.
    pub fn setting<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.settings.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Path of the sample asset: [`ASSET_PATH_SETTING`], then
    /// [`LEGACY_ASSET_PATH_SETTING`], then [`DEFAULT_ASSET_PATH`].
    pub fn asset_path(&self) -> &str {
        self.setting(
            ASSET_PATH_SETTING,
            self.setting(LEGACY_ASSET_PATH_SETTING, DEFAULT_ASSET_PATH),
        )
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}
