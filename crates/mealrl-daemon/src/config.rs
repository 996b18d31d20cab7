//! Configuration loading for the mealrl daemon

use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

use mealrl_rl::AgentConfig;

/// Prefix for environment overrides, e.g. `MEALRL__AGENT__EPSILON=0.05`
pub const ENV_PREFIX: &str = "MEALRL";

/// Configuration for the daemon
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub log_level: String,
    /// Also log to this file when non-empty
    pub log_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_file(), ENV_PREFIX)
    }

    /// Layer `path` (if any) under environment variables named
    /// `<prefix>__SECTION__KEY`.
    pub fn load_from(path: Option<PathBuf>, env_prefix: &str) -> Result<Self> {
        let mut builder = ConfigBuilder::<config::builder::DefaultState>::default();

        if let Some(path) = &path {
            tracing::info!("Loading config from: {:?}", path);
            builder = builder.add_source(File::from(path.clone()).required(false));
        } else {
            tracing::info!("No config file found, using defaults");
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config
            .agent
            .hyperparameters()
            .validate()
            .context("Invalid agent hyperparameters")?;
        Ok(config)
    }

    /// Find the configuration file
    fn find_config_file() -> Option<PathBuf> {
        // Check in order: MEALRL_CONFIG env, ./mealrl.toml, ~/.config/mealrl/mealrl.toml
        if let Ok(path) = std::env::var("MEALRL_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local = PathBuf::from("mealrl.toml");
        if local.exists() {
            return Some(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config").join("mealrl").join("mealrl.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }
}
