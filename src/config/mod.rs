//! # Configuration
//!
//! Explicit, validated configuration passed to [`Project`](crate::Project)
//! and [`Orchestrator`](crate::orchestration::Orchestrator) at construction.
//! There is no process-wide store location; every handle is built from an
//! [`AdaptiveConfig`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adaptive_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/adaptive.toml")?;
//! let dead_time = manager.config().orchestrator.dead_time_seconds;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::bundle::CachePolicy;
use crate::constants::defaults;
use crate::state_machine::DeadWorkerPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Project name; prefixes every collection of the project
    pub project: String,
    pub store: StoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub cache: CacheConfig,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            project: defaults::PROJECT_NAME.to_string(),
            store: StoreConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AdaptiveConfig {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.project.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "project",
                &self.project,
                "project name must not be empty",
            ));
        }
        self.store.validate()?;
        self.orchestrator.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Entity store connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Prepended to every collection name, e.g. to share one database
    /// between deployments
    pub collection_prefix: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: defaults::MAX_CONNECTIONS,
            collection_prefix: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backend == StoreBackend::Postgres
            && self.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigurationError::missing_required_field(
                "database_url",
                "store (postgres backend)",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.max_connections",
                self.max_connections,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Trigger loop, fault sweep and driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds without a heartbeat before a worker is declared dead
    pub dead_time_seconds: u64,
    pub dead_worker_policy: DeadWorkerPolicy,
    /// Bound on event-advancement passes within one trigger
    pub max_trigger_iterations: usize,
    pub trigger_interval_seconds: u64,
    pub wait_poll_interval_seconds: u64,
    /// Re-queue tasks the sweep reset to `created`
    pub requeue_reclaimed_tasks: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dead_time_seconds: defaults::DEAD_TIME_SECONDS,
            dead_worker_policy: DeadWorkerPolicy::default(),
            max_trigger_iterations: defaults::MAX_TRIGGER_ITERATIONS,
            trigger_interval_seconds: defaults::TRIGGER_INTERVAL_SECONDS,
            wait_poll_interval_seconds: defaults::WAIT_POLL_INTERVAL_SECONDS,
            requeue_reclaimed_tasks: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn dead_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.dead_time_seconds).unwrap_or(i64::MAX))
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_seconds)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_poll_interval_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_trigger_iterations == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_trigger_iterations",
                self.max_trigger_iterations,
                "must be at least 1",
            ));
        }
        if self.trigger_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.trigger_interval_seconds",
                self.trigger_interval_seconds,
                "must be at least 1",
            ));
        }
        // the sweep only runs when triggered, so the driver must tick
        // more often than a worker may stay silent
        if self.dead_time_seconds <= self.trigger_interval_seconds {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.dead_time_seconds",
                self.dead_time_seconds,
                format!(
                    "must exceed trigger_interval_seconds ({})",
                    self.trigger_interval_seconds
                ),
            ));
        }
        Ok(())
    }
}

/// Cache policy per project bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub tasks: CachePolicy,
    pub workers: CachePolicy,
    pub trajectories: CachePolicy,
    pub models: CachePolicy,
    pub configurations: CachePolicy,
    pub logs: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tasks: CachePolicy::Strong,
            workers: CachePolicy::Strong,
            trajectories: CachePolicy::Strong,
            models: CachePolicy::Bounded(defaults::BOUNDED_CACHE_CAPACITY),
            configurations: CachePolicy::Strong,
            logs: CachePolicy::Bounded(defaults::BOUNDED_CACHE_CAPACITY),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let policies = [
            ("tasks", self.tasks),
            ("workers", self.workers),
            ("trajectories", self.trajectories),
            ("models", self.models),
            ("configurations", self.configurations),
            ("logs", self.logs),
        ];
        for (bundle, policy) in policies {
            if policy == CachePolicy::Bounded(0) {
                return Err(ConfigurationError::invalid_value(
                    format!("cache.{bundle}"),
                    policy,
                    "bounded cache capacity must be at least 1",
                ));
            }
        }
        Ok(())
    }
}
