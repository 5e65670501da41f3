use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_parallel: {0}. Must be between 1 and 100")]
    InvalidMaxParallel(usize),

    #[error("Invalid parallel_floor: {0}. Must be at least 1")]
    InvalidParallelFloor(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("api_key_env_var cannot be empty")]
    EmptyApiKeyEnvVar,

    #[error(
        "Invalid backoff configuration: backoff_base_ms ({0}) must be less than backoff_max_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid launch_budget_window_ms: {0}. Must be positive when a launch budget is set")]
    InvalidLaunchWindow(u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `<workspace>/.kiro/config/kse.yaml` (project config)
    /// 3. `<workspace>/.kiro/config/local.yaml` (local overrides, optional)
    /// 4. Environment variables (`KSE_*` prefix, highest priority)
    pub fn load(workspace_root: &Path) -> Result<Config> {
        let config_dir = workspace_root.join(".kiro").join("config");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_dir.join("kse.yaml")))
            .merge(Yaml::file(config_dir.join("local.yaml")))
            .merge(Env::prefixed("KSE_").split("__"))
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
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_parallel == 0 || config.max_parallel > 100 {
            return Err(ConfigError::InvalidMaxParallel(config.max_parallel));
        }

        if config.rate_limit.parallel_floor == 0 {
            return Err(ConfigError::InvalidParallelFloor(
                config.rate_limit.parallel_floor,
            ));
        }

        if config.agent.api_key_env_var.trim().is_empty() {
            return Err(ConfigError::EmptyApiKeyEnvVar);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.rate_limit.backoff_base_ms >= config.rate_limit.backoff_max_ms {
            return Err(ConfigError::InvalidBackoff(
                config.rate_limit.backoff_base_ms,
                config.rate_limit.backoff_max_ms,
            ));
        }

        if config.rate_limit.launch_budget_per_minute > 0
            && config.rate_limit.launch_budget_window_ms == 0
        {
            return Err(ConfigError::InvalidLaunchWindow(
                config.rate_limit.launch_budget_window_ms,
            ));
        }

        Ok(())
    }
}
