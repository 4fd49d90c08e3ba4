//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML/YAML/JSON file and
//! `ADAPTIVE__`-prefixed environment variables (`__` separates nested keys,
//! e.g. `ADAPTIVE__ORCHESTRATOR__DEAD_TIME_SECONDS=120`).

use super::error::{ConfigResult, ConfigurationError};
use super::AdaptiveConfig;
use crate::constants::env as env_keys;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded and validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: AdaptiveConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults plus process environment overrides
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::build(None, None)
    }

    /// Defaults, then `path`, then process environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(Some(path.as_ref()), None)
    }

    /// Like [`load_from_file`](Self::load_from_file) with an explicit variable
    /// map in place of the process environment.
    /// This is useful for testing without modifying global environment variables
    pub fn load_with_env(
        path: Option<&Path>,
        vars: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(path, Some(vars))
    }

    /// Wrap an already constructed configuration after validating it
    pub fn from_config(config: AdaptiveConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    fn build(
        path: Option<&Path>,
        vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let mut builder =
            Config::builder().add_source(Config::try_from(&AdaptiveConfig::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                });
            }
            debug!("Loading configuration file: {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let overrides = Environment::with_prefix(env_keys::CONFIG_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(vars);
        let config: AdaptiveConfig = builder.add_source(overrides).build()?.try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            project = %config.project,
            backend = ?config.store.backend,
            dead_time_seconds = config.orchestrator.dead_time_seconds,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source: path.map(Path::to_path_buf),
        }))
    }

    fn detect_environment() -> String {
        std::env::var(env_keys::ENVIRONMENT)
            .or_else(|_| std::env::var(env_keys::FALLBACK_ENVIRONMENT))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
