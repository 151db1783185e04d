//! # Fiscal Configuration
//!
//! Configuration for the database, the chain critical section and the
//! provenance written into every record.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FISCAL_DB_PATH=/var/lib/fiscal/fiscal.db                           │
//! │     FISCAL_LOCK_TIMEOUT_MS=2000                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/fiscal-audit/fiscal-audit.toml (Linux)                   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "fiscal.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [chain]
//! lock_timeout_ms = 5000
//! verify_page_size = 500
//!
//! [software]
//! id = "POS-1"
//! version = "1.0.0"
//! developer_id = "B00000000"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};

const CONFIG_FILE_NAME: &str = "fiscal-audit.toml";

// =============================================================================
// Database Settings
// =============================================================================

/// Where the fiscal log lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long SQLite waits for another process holding the write lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("fiscal.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

// =============================================================================
// Chain Settings
// =============================================================================

/// Critical-section and verification tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Upper bound on waiting for a device's lock. Exceeding it is a
    /// retryable chain conflict.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Records fetched per page while verifying.
    #[serde(default = "default_verify_page_size")]
    pub verify_page_size: u32,
}

fn default_lock_timeout() -> u64 {
    5_000
}

fn default_verify_page_size() -> u32 {
    500
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            verify_page_size: default_verify_page_size(),
        }
    }
}

impl ChainSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// =============================================================================
// Software Settings
// =============================================================================

/// Provenance of the software producing records. Hashed into every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareSettings {
    #[serde(default = "default_software_id")]
    pub id: String,

    #[serde(default = "default_software_version")]
    pub version: String,

    /// Tax identifier of the software developer.
    #[serde(default = "default_developer_id")]
    pub developer_id: String,
}

fn default_software_id() -> String {
    "FISCAL-AUDIT".to_string()
}

fn default_software_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_developer_id() -> String {
    "UNREGISTERED".to_string()
}

impl Default for SoftwareSettings {
    fn default() -> Self {
        Self {
            id: default_software_id(),
            version: default_software_version(),
            developer_id: default_developer_id(),
        }
    }
}

// =============================================================================
// Fiscal Config
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub chain: ChainSettings,

    #[serde(default)]
    pub software: SoftwareSettings,
}

impl FiscalConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (explicit path, else the platform config dir)
    /// 3. Environment variables
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading fiscal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else if explicit {
                return Err(ConfigError::LoadFailed(format!(
                    "config file not found: {}",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load fiscal config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        info!(?path, "Fiscal config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig("database.path must be set".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.chain.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "chain.lock_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.chain.verify_page_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "chain.verify_page_size must be greater than 0".into(),
            ));
        }

        for (key, value) in [
            ("software.id", &self.software.id),
            ("software.version", &self.software.version),
            ("software.developer_id", &self.software.developer_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!("{key} must be set")));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FISCAL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(timeout) = std::env::var("FISCAL_LOCK_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => self.chain.lock_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid FISCAL_LOCK_TIMEOUT_MS"),
            }
        }

        if let Ok(size) = std::env::var("FISCAL_VERIFY_PAGE_SIZE") {
            match size.parse::<u32>() {
                Ok(n) => self.chain.verify_page_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid FISCAL_VERIFY_PAGE_SIZE"),
            }
        }

        if let Ok(id) = std::env::var("FISCAL_SOFTWARE_ID") {
            self.software.id = id;
        }

        if let Ok(version) = std::env::var("FISCAL_SOFTWARE_VERSION") {
            self.software.version = version;
        }

        if let Ok(developer_id) = std::env::var("FISCAL_DEVELOPER_ID") {
            self.software.developer_id = developer_id;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fiscal", "fiscal-audit")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FiscalConfig::default();
        assert_eq!(config.database.path, PathBuf::from("fiscal.db"));
        assert_eq!(config.chain.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.chain.verify_page_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = FiscalConfig::default();

        config.chain.lock_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.chain.lock_timeout_ms = 100;
        config.chain.verify_page_size = 0;
        assert!(config.validate().is_err());

        config.chain.verify_page_size = 10;
        config.software.developer_id = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(ref msg)) if msg.contains("developer_id")
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FiscalConfig::from_toml(
            r#"
            [software]
            id = "POS-1"
            version = "2.3.0"
            developer_id = "B12345678"
            "#,
        )
        .unwrap();

        assert_eq!(config.software.id, "POS-1");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.chain.lock_timeout_ms, 5_000);
    }

    #[test]
    fn test_malformed_toml_is_load_failure() {
        let err = FiscalConfig::from_toml("[chain]\nlock_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed(_)));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = FiscalConfig::default();
        config.database.path = PathBuf::from("/var/lib/fiscal/fiscal.db");
        config.chain.verify_page_size = 64;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let back = FiscalConfig::from_toml(&contents).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FiscalConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed(_)));
    }
}
