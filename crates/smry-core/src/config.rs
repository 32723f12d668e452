//! Configuration types and loading for smry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;
use crate::models::HierarchyLevel;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the smry database.
    pub database: PathBuf,

    /// Base URL of the external summary generator collaborator.
    pub generator_endpoint: Option<String>,

    /// Base URL of the external source data provider collaborator.
    pub source_endpoint: Option<String>,

    /// Timeout for a single generator call, in seconds.
    pub generator_timeout_secs: u64,

    /// Freshness verification TTLs.
    pub verify_ttl: VerifyTtlConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smry");

        Self {
            database: data_dir.join("smry.db"),
            generator_endpoint: None,
            source_endpoint: None,
            generator_timeout_secs: 60,
            verify_ttl: VerifyTtlConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smry")
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
    }
}

/// How long a verified summary may be served without re-checking its
/// fingerprint against the current source data, per hierarchy level.
///
/// Zero (the default) means every cache read re-verifies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyTtlConfig {
    pub individual_secs: u64,
    pub group_secs: u64,
    pub global_secs: u64,
}

impl VerifyTtlConfig {
    /// TTL in seconds for the given hierarchy level.
    pub fn for_level(&self, level: HierarchyLevel) -> u64 {
        match level {
            HierarchyLevel::Individual => self.individual_secs,
            HierarchyLevel::Group => self.group_secs,
            HierarchyLevel::Global => self.global_secs,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
