use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::adapter::storage::StorageType;

/// Overrides the configuration directory
pub const HOME_ENV: &str = "WORKCHAIN_HOME";

/// Configuration structure for the workchain CLI
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Storage backend for nodes and checkpoints
    pub storage:          StorageType,
    /// RocksDB directory; `db` under the configuration directory when unset
    pub database_path:    Option<PathBuf>,
    /// How often running jobs are polled
    pub poll_interval_ms: u64,
    /// Fallback log filter when `RUST_LOG` is not set
    pub log_level:        String
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage:          StorageType::RocksDb,
            database_path:    None,
            poll_interval_ms: 200,
            log_level:        "warn".to_string()
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_dir()?.join("db"))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "workchain").context("Failed to determine project directories")
}

/// Get the configuration directory path
pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(home) = env::var(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    let project_dirs = get_project_dirs()?;
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Get the config file path
pub fn get_config_file_path() -> Result<PathBuf> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join("config.yaml"))
}

/// Load configuration from file or create default if it doesn't exist
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&get_config_file_path()?)
}

pub fn load_config_from(config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        Ok(config)
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &get_config_file_path()?)
}

pub fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let content = serde_yaml::to_string(config).context("Failed to serialize config")?;

    fs::write(config_path, content)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_are_written_on_first_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "storage: inmemory\npoll_interval_ms: 50\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.storage, StorageType::InMemory);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.log_level, "warn");
    }
}
