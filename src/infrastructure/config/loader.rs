use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid controller workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error("Invalid reconcile timeout: {0}s. Must be positive")]
    InvalidReconcileTimeout(u64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: base_delay_ms ({0}) must be less than max_delay_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid max_total_cells: {0}. Must be at least 1")]
    InvalidMaxTotalCells(u32),

    #[error("Workspace root cannot be empty")]
    EmptyWorkspaceRoot,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .cellplane/config.yaml (project config)
    /// 3. .cellplane/local.yaml (project local overrides, optional)
    /// 4. Environment variables (CELLPLANE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".cellplane/config.yaml"))
            .merge(Yaml::file(".cellplane/local.yaml"))
            .merge(Env::prefixed("CELLPLANE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.controllers.workers == 0 || config.controllers.workers > 64 {
            return Err(ConfigError::InvalidWorkers(config.controllers.workers));
        }
        if config.controllers.reconcile_timeout_secs == 0 {
            return Err(ConfigError::InvalidReconcileTimeout(
                config.controllers.reconcile_timeout_secs,
            ));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.base_delay_ms >= config.retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.base_delay_ms,
                config.retry.max_delay_ms,
            ));
        }

        if config.limits.max_total_cells == 0 {
            return Err(ConfigError::InvalidMaxTotalCells(config.limits.max_total_cells));
        }
        if config.workspace_root.is_empty() {
            return Err(ConfigError::EmptyWorkspaceRoot);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.path, ".cellplane/cellplane.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 3
logging:
  level: debug
  format: json
controllers:
  workers: 8
  reconcile_timeout_secs: 45
  resync_interval_secs: 120
limits:
  max_total_cells: 50
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.controllers.workers, 8);
        assert_eq!(config.limits.max_total_cells, 50);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));

        let mut config = Config::default();
        config.controllers.workers = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkers(0))
        ));

        let mut config = Config::default();
        config.retry.base_delay_ms = 60_000;
        config.retry.max_delay_ms = 30_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(60_000, 30_000))
        ));

        let mut config = Config::default();
        config.limits.max_total_cells = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxTotalCells(0))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "controllers:\n  workers: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "controllers:\n  workers: 6\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.controllers.workers, 6, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
