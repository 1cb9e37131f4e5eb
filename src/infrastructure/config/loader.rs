use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid history_capacity: {0}. Must be at least 1")]
    InvalidHistoryCapacity(usize),

    #[error("Invalid idempotency_capacity: {0}. Must be at least 1")]
    InvalidIdempotencyCapacity(usize),

    #[error("Invalid breaker_threshold: {0}. Must be at least 1")]
    InvalidBreakerThreshold(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid action defaults: {0}")]
    InvalidActionDefaults(String),

    #[error("Invalid executor command for '{0}': command line is empty")]
    EmptyExecutorCommand(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .warden/config.yaml (project config)
    /// 3. .warden/local.yaml (local overrides, optional)
    /// 4. Environment variables (WARDEN_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".warden/config.yaml"))
            .merge(Yaml::file(".warden/local.yaml"))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("WARDEN_").split("__"))
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
        if config.engine.history_capacity == 0 {
            return Err(ConfigError::InvalidHistoryCapacity(
                config.engine.history_capacity,
            ));
        }

        if config.dispatcher.idempotency_capacity == 0 {
            return Err(ConfigError::InvalidIdempotencyCapacity(
                config.dispatcher.idempotency_capacity,
            ));
        }

        if config.dispatcher.breaker_threshold == 0 {
            return Err(ConfigError::InvalidBreakerThreshold(
                config.dispatcher.breaker_threshold,
            ));
        }

        let defaults = &config.dispatcher.action_defaults;
        if defaults.max_attempts == 0 {
            return Err(ConfigError::InvalidActionDefaults(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if defaults.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidActionDefaults(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                defaults.backoff_multiplier
            )));
        }
        if defaults.timeout_ms == 0 {
            return Err(ConfigError::InvalidActionDefaults(
                "timeout_ms must be positive".to_string(),
            ));
        }

        if let Some((action_type, _)) = config
            .executor
            .commands
            .iter()
            .find(|(_, argv)| argv.first().is_none_or(|program| program.trim().is_empty()))
        {
            return Err(ConfigError::EmptyExecutorCommand(action_type.clone()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if let Some(ref path) = config.engine.rules_file {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "engine.rules_file cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
