//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PERK_DB_PATH=/var/lib/perk/perk.db                                 │
//! │     PERK_MAX_CONNECTIONS=8                                             │
//! │     PERK_CONCURRENCY=16                                                │
//! │     PERK_LOG=info,perk=debug                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/perk/perk.toml (Linux)                                   │
//! │     ~/Library/Application Support/dev.perk.perk/perk.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/perk/perk.db"
//! max_connections = 8
//! busy_timeout_ms = 5000
//!
//! [evaluation]
//! concurrency = 16
//!
//! [log]
//! filter = "info,perk=debug,sqlx=warn"
//! ```

use perk_db::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Database Settings
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a cap reservation waits for the write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Evaluation Settings
// =============================================================================

/// `[evaluation]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// Evaluations in flight at once during batch runs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    8
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        EvaluationSettings {
            concurrency: default_concurrency(),
        }
    }
}

// =============================================================================
// Log Settings
// =============================================================================

/// `[log]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` still wins.
    #[serde(default)]
    pub filter: Option<String>,
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub evaluation: EvaluationSettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (perk.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    EngineError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
                })?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(EngineError::ConfigLoadFailed(format!(
                    "{} does not exist",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.evaluation.concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "evaluation.concurrency must be greater than 0".into(),
            ));
        }

        if let Some(path) = &self.database.path {
            if path.as_os_str().is_empty() {
                return Err(EngineError::InvalidConfig("database.path is empty".into()));
            }
        }

        Ok(())
    }

    /// Applies `PERK_*` overrides from `lookup` (the process environment in
    /// [`EngineConfig::load`]).
    ///
    /// Runs before logging is set up, so an unparsable value is an error
    /// rather than a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<()> {
        if let Some(path) = lookup("PERK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(max) = lookup("PERK_MAX_CONNECTIONS") {
            self.database.max_connections = parse_override("PERK_MAX_CONNECTIONS", &max)?;
        }

        if let Some(concurrency) = lookup("PERK_CONCURRENCY") {
            self.evaluation.concurrency = parse_override("PERK_CONCURRENCY", &concurrency)?;
        }

        if let Some(filter) = lookup("PERK_LOG") {
            self.log.filter = Some(filter);
        }

        Ok(())
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "perk", "perk")
            .map(|dirs| dirs.config_dir().join("perk.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The SQLite file to open: configured, else the platform data
    /// directory, else `perk.db` in the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("dev", "perk", "perk")
                    .map(|dirs| dirs.data_dir().join("perk.db"))
            })
            .unwrap_or_else(|| PathBuf::from("perk.db"))
    }

    /// Pool settings for perk-db.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.evaluation.concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.evaluation.concurrency = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [evaluation]
            concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.evaluation.concurrency, 2);
        assert_eq!(config.database, DatabaseSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PERK_DB_PATH", "/tmp/override.db"),
            ("PERK_CONCURRENCY", "3"),
            ("PERK_MAX_CONNECTIONS", "12"),
            ("PERK_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/override.db"));
        assert_eq!(config.evaluation.concurrency, 3);
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.log.filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unparsable_env_override_is_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PERK_MAX_CONNECTIONS").then(|| "lots".to_string()))
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidConfig(ref msg) if msg.contains("PERK_MAX_CONNECTIONS")));
        assert_eq!(config.database.max_connections, 5);

        let err = config
            .apply_overrides(|key| (key == "PERK_CONCURRENCY").then(|| "-2".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perk.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            path = "rewards.db"
            busy_timeout_ms = 250

            [log]
            filter = "warn"
            "#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(config.db_config().busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, EngineError::ConfigLoadFailed(_)));
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[evaluation]"));
    }
}
