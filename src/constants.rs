//! # System Constants
//!
//! Defaults and well-known names shared by the orchestrator, the bundles and
//! the worker protocol.

/// Collection kinds; a project's collections are named `<project>.<kind>`
pub mod kinds {
    pub const TASKS: &str = "tasks";
    pub const WORKERS: &str = "workers";
    pub const TRAJECTORIES: &str = "trajectories";
    pub const MODELS: &str = "models";
    pub const CONFIGURATIONS: &str = "configurations";
    pub const LOGS: &str = "logs";

    pub const ALL: [&str; 6] = [TASKS, WORKERS, TRAJECTORIES, MODELS, CONFIGURATIONS, LOGS];
}

/// Document field names used in queries, indices and compare-and-set updates
pub mod fields {
    pub const STATE: &str = "state";
    pub const STATE_CHANGED_AT: &str = "state_changed_at";
    pub const WORKER: &str = "worker";
    pub const SEEN: &str = "seen";
    pub const COMMAND: &str = "command";
    pub const CURRENT: &str = "current";
    pub const EXISTS: &str = "exists";
    pub const NAME: &str = "name";
}

/// Orchestrator defaults
pub mod defaults {
    /// Seconds without a heartbeat before a worker is declared dead
    pub const DEAD_TIME_SECONDS: u64 = 60;
    /// Inner trigger-loop passes per `trigger()` call
    pub const MAX_TRIGGER_ITERATIONS: usize = 50;
    pub const TRIGGER_INTERVAL_SECONDS: u64 = 5;
    pub const WAIT_POLL_INTERVAL_SECONDS: u64 = 5;
    /// Compare-and-set attempts before a transition reports contention
    pub const MAX_CAS_ATTEMPTS: usize = 3;
    /// Commit attempts before an outbox task the store keeps rejecting is dropped
    pub const MAX_COMMIT_ATTEMPTS: usize = 3;
    pub const BOUNDED_CACHE_CAPACITY: usize = 1000;
    pub const MAX_CONNECTIONS: u32 = 10;
    pub const PROJECT_NAME: &str = "default";
}

/// Environment variable names
pub mod env {
    pub const ENVIRONMENT: &str = "ADAPTIVE_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FORMAT: &str = "ADAPTIVE_LOG_FORMAT";
    pub const CONFIG_PREFIX: &str = "ADAPTIVE";
    pub const DATABASE_URL: &str = "DATABASE_URL";
}

/// Location scheme for generated trajectory names
pub const TRAJECTORY_LOCATION_PREFIX: &str = "sandbox:///projects";
