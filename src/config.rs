//! Agent configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SHIPWAL_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use shipwal_client::WalConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Write-ahead log configuration.
    pub wal: WalConfig,
    /// Client identity and batching.
    pub client: ClientConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SHIPWAL_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.wal.apply_env_overrides();
        self.client.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.name.is_empty() {
            return Err(ConfigError::Validation("client.name must not be empty".into()));
        }
        if self.client.tenant_id.is_empty() {
            return Err(ConfigError::Validation(
                "client.tenant_id must not be empty".into(),
            ));
        }
        if self.client.batch_size == 0 {
            return Err(ConfigError::Validation(
                "client.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Client identity and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name, the first level of the WAL directory layout.
    pub name: String,
    /// Tenant the batches belong to.
    pub tenant_id: String,
    /// Labels of the single stream read from stdin.
    pub labels: BTreeMap<String, String>,
    /// Lines per batch.
    pub batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("job".to_string(), "stdin".to_string());
        Self {
            name: "default".to_string(),
            tenant_id: "fake".to_string(),
            labels,
            batch_size: 100,
        }
    }
}

impl ClientConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("SHIPWAL_CLIENT_NAME") {
            self.name = name;
        }
        if let Ok(tenant) = std::env::var("SHIPWAL_TENANT_ID") {
            self.tenant_id = tenant;
        }
        if let Ok(size) = std::env::var("SHIPWAL_BATCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.batch_size = n;
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
