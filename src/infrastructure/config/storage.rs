use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{info, warn};

use super::app_config::AppConfig;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";
const APP_NAME: &str = "shardline";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Finds and reads `config.toml`.
pub struct StorageManager {
    config_dir: PathBuf,
}

impl StorageManager {
    /// Create a new `StorageManager`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirNotFound)?;

        Ok(Self { config_dir })
    }

    /// Creates a new `StorageManager` with a specific directory (useful for testing).
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Returns the configuration directory path.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Loads the application configuration.
    ///
    /// A missing file yields the defaults. So does a file that fails to
    /// parse, after a warning.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let config_path = path_override.map_or_else(
            || self.config_dir.join(CONFIG_FILE_NAME),
            Path::to_path_buf,
        );
        Self::read_config(&config_path)
    }

    /// Reads a configuration file, falling back to defaults as `load_config` does.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read.
    pub fn read_config(config_path: &Path) -> Result<AppConfig, ConfigError> {
        let content = match fs::read_to_string(config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %config_path.display(), "Config file not found, using defaults");
                return Ok(AppConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "Failed to parse config file, using defaults");
                Ok(AppConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ShardCount;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::with_dir(dir.path().join("shardline"));

        let config = manager.load_config(None).unwrap();
        assert_eq!(config.shards, ShardCount::Auto);
        assert!(!dir.path().join("shardline").join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_load_config_reads_default_location() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::with_dir(dir.path().to_path_buf());
        fs::write(dir.path().join(CONFIG_FILE_NAME), "shards = 8\nemit_raw = true").unwrap();

        let config = manager.load_config(None).unwrap();
        assert_eq!(config.shards, ShardCount::Fixed(8));
        assert!(config.emit_raw);
    }

    #[test]
    fn test_load_config_prefers_override_path() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::with_dir(dir.path().to_path_buf());
        fs::write(dir.path().join(CONFIG_FILE_NAME), "shards = 8").unwrap();
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "shards = 2").unwrap();

        let config = manager.load_config(Some(&custom)).unwrap();
        assert_eq!(config.shards, ShardCount::Fixed(2));
    }

    #[test]
    fn test_load_config_handles_malformed_file() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::with_dir(dir.path().to_path_buf());
        let config_file = dir.path().join(CONFIG_FILE_NAME);

        fs::write(&config_file, "shards = [").unwrap();

        let config = manager.load_config(None).unwrap();
        assert_eq!(config.shards, ShardCount::Auto);
        let content = fs::read_to_string(&config_file).unwrap();
        assert_eq!(content, "shards = [");
    }

    #[test]
    fn test_load_config_surfaces_read_errors() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::with_dir(dir.path().to_path_buf());

        let result = manager.load_config(Some(dir.path()));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
