use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid adaptive threshold configuration: {0}")]
    InvalidThresholds(String),

    #[error("Invalid min_data_points: {0}. Must be at least 1")]
    InvalidMinDataPoints(usize),

    #[error("Invalid window_days: {0}. Must be at least 1")]
    InvalidWindowDays(i64),
}

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
pub const VALID_LOG_FORMATS: [&str; 2] = ["json", "pretty"];
pub const VALID_ROTATIONS: [&str; 3] = ["daily", "hourly", "never"];

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .fixloop/config.yaml (project config)
    /// 3. .fixloop/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FIXLOOP_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".fixloop")
    }

    /// Same precedence as [`ConfigLoader::load`], rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("FIXLOOP_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.coordinator.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(
                config.coordinator.max_iterations,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        if !VALID_LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if !VALID_LOG_FORMATS.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if !VALID_ROTATIONS.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        config
            .adaptive_thresholds
            .validate()
            .map_err(ConfigError::InvalidThresholds)?;

        if config.analysis.min_data_points == 0 {
            return Err(ConfigError::InvalidMinDataPoints(
                config.analysis.min_data_points,
            ));
        }

        if config.analysis.window_days <= 0 {
            return Err(ConfigError::InvalidWindowDays(config.analysis.window_days));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.coordinator.max_iterations, 5);
        assert_eq!(config.database.path, ".fixloop/fixloop.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.analysis.min_data_points, 30);
        assert!(config.adaptive_thresholds.enabled);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
coordinator:
  max_iterations: 8
database:
  path: /custom/path.db
  max_connections: 2
logging:
  level: debug
  format: pretty
adaptive_thresholds:
  enabled: false
  phase3ComplexityThreshold:
    min: 12
    max: 30
    current: 20
    learningRate: 0.2
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.coordinator.max_iterations, 8);
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.logging.format, "pretty");
        assert!(!config.adaptive_thresholds.enabled);
        assert_eq!(config.adaptive_thresholds.phase3_complexity_threshold.current, 20.0);
        // Unmentioned thresholds keep their defaults.
        assert_eq!(config.adaptive_thresholds.phase3_iteration_threshold.current, 2.0);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_max_iterations() {
        let mut config = Config::default();
        config.coordinator.max_iterations = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxIterations(0)
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "verbose"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));
    }

    #[test]
    fn test_validate_invalid_rotation() {
        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidRotation(_)
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyDatabasePath
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_threshold_out_of_bounds() {
        let mut config = Config::default();
        config.adaptive_thresholds.phase2_reproduction_threshold.current = 7.0;
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidThresholds(msg) => assert!(msg.contains("reproduction")),
            other => panic!("Expected InvalidThresholds error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_analysis_settings() {
        let mut config = Config::default();
        config.analysis.min_data_points = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMinDataPoints(0)
        ));

        let mut config = Config::default();
        config.analysis.window_days = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidWindowDays(0)
        ));
    }

    #[test]
    fn test_hierarchical_merging_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "coordinator:\n  max_iterations: 4\nlogging:\n  level: info\n  format: pretty\n",
        )
        .unwrap();
        fs::write(dir.path().join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        temp_env::with_vars(
            [
                ("FIXLOOP_COORDINATOR__MAX_ITERATIONS", Some("9")),
                ("FIXLOOP_ANALYSIS__MIN_DATA_POINTS", Some("50")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.coordinator.max_iterations, 9, "env should win");
                assert_eq!(config.analysis.min_data_points, 50);
                assert_eq!(config.logging.level, "debug", "local.yaml should win");
                assert_eq!(config.logging.format, "pretty", "base value should persist");
            },
        );
    }

    #[test]
    fn test_load_from_dir_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "database:\n  max_connections: 0\n").unwrap();
        temp_env::with_vars_unset(["FIXLOOP_DATABASE__MAX_CONNECTIONS"], || {
            assert!(ConfigLoader::load_from_dir(dir.path()).is_err());
        });
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixloop.yaml");
        fs::write(&path, "database:\n  path: /tmp/other.db\n").unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/other.db");
        assert_eq!(config.database.max_connections, 5);
    }
}
