// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Vault Configuration
//!
//! YAML configuration for the embedded store and its backup subsystem.
//!
//! ```yaml
//! storage:
//!   data_dir: ./data/knowledge_base
//!   backup_dir: ./data/backups
//! backup:
//!   enabled: true
//!   interval_seconds: 3600
//!   retention_days: 30
//!   max_chain_depth: 24
//! scoring:
//!   weights: { latex: 0.4, visual: 0.3, context: 0.2, frequency: 0.1 }
//! concurrency:
//!   lock_timeout: 5s
//!   max_retries: 3
//!   retry_backoff: 50ms
//! ```
//!
//! ## Discovery
//!
//! 1. Explicit `--config` path (must exist)
//! 2. `CVAULT_CONFIG_PATH`
//! 3. `./cvault.yaml`
//! 4. `~/.cvault/config.yaml`
//! 5. `/etc/cvault/config.yaml`
//!
//! Falls back to defaults when nothing is found.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::scoring::ScoreWeights;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub scoring: ScoringConfig,
    pub concurrency: ConcurrencyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/knowledge_base"),
            backup_dir: PathBuf::from("./data/backups"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Whether the background scheduler runs
    pub enabled: bool,

    /// How often the scheduler wakes up (in seconds)
    pub interval_seconds: u64,

    /// Backups older than this are candidates for pruning
    pub retention_days: i64,

    /// Longest incremental chain before a full backup is forced
    pub max_chain_depth: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            retention_days: 30,
            max_chain_depth: 24,
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl VaultConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CVAULT_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./cvault.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cvault").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/cvault/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(path)?
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides for container deployments
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CVAULT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CVAULT_BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("CVAULT_BACKUP_INTERVAL") {
            match val.parse() {
                Ok(secs) => self.backup.interval_seconds = secs,
                Err(_) => tracing::warn!("Ignoring invalid CVAULT_BACKUP_INTERVAL '{}'", val),
            }
        }
        if let Ok(val) = std::env::var("CVAULT_RETENTION_DAYS") {
            match val.parse() {
                Ok(days) => self.backup.retention_days = days,
                Err(_) => tracing::warn!("Ignoring invalid CVAULT_RETENTION_DAYS '{}'", val),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.data_dir cannot be empty");
        }
        if self.storage.backup_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.backup_dir cannot be empty");
        }
        if self.backup.interval_seconds == 0 {
            anyhow::bail!("backup.interval_seconds must be greater than zero");
        }
        if self.backup.retention_days < 0 {
            anyhow::bail!("backup.retention_days cannot be negative");
        }
        if self.backup.max_chain_depth == 0 {
            anyhow::bail!("backup.max_chain_depth must be at least 1");
        }
        if self.concurrency.lock_timeout.is_zero() {
            anyhow::bail!("concurrency.lock_timeout must be greater than zero");
        }
        self.scoring.weights.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = VaultConfig::default();
        assert_eq!(config.backup.interval_seconds, 3600);
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.scoring.weights, ScoreWeights::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = VaultConfig::from_yaml_str(
            r#"
backup:
  interval_seconds: 60
concurrency:
  lock_timeout: 250ms
"#,
        )
        .unwrap();
        assert_eq!(config.backup.interval_seconds, 60);
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.concurrency.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.concurrency.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = VaultConfig::default();
        config.backup.interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = VaultConfig::default();
        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(VaultConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
