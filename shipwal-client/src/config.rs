//! WAL configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// WAL configuration.
///
/// Segment size is not configurable; the engine default is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Buffer batches on disk before shipping them.
    pub enabled: bool,
    /// Root directory. Each client and tenant gets `<dir>/<client>/<tenant>`.
    pub dir: PathBuf,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./wal"),
        }
    }
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
        }
    }

    /// Applies `SHIPWAL_WAL_ENABLED` and `SHIPWAL_WAL_DIR` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("SHIPWAL_WAL_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(dir) = std::env::var("SHIPWAL_WAL_DIR") {
            self.dir = PathBuf::from(dir);
        }
    }

    /// Returns the WAL directory of one client and tenant.
    pub fn wal_dir(&self, client_name: &str, tenant_id: &str) -> PathBuf {
        self.dir.join(client_name).join(tenant_id)
    }
}
