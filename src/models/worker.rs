use crate::bundle::Entity;
use crate::constants::kinds;
use crate::state_machine::WorkerState;
use crate::store::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Control signal the orchestrator leaves for a worker to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCommand {
    Kill,
    Shutdown,
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kill => write!(f, "kill"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Remote execution agent, polled through its heartbeat
///
/// Only the worker writes its own record, except for `command` and the
/// `dead` state which belong to the fault sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: EntityId,
    pub hostname: String,
    #[serde(default)]
    pub state: WorkerState,
    /// Last heartbeat
    pub seen: DateTime<Utc>,
    #[serde(default)]
    pub command: Option<WorkerCommand>,
    /// Task being executed
    #[serde(default)]
    pub current: Option<EntityId>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(hostname: impl Into<String>, seen: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::new(),
            hostname: hostname.into(),
            state: WorkerState::Registered,
            seen,
            command: None,
            current: None,
            created: None,
            modified: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Whether the last heartbeat is older than `dead_time` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, dead_time: chrono::Duration) -> bool {
        now - self.seen > dead_time
    }
}

impl Entity for Worker {
    const KIND: &'static str = kinds::WORKERS;

    fn id(&self) -> EntityId {
        self.id
    }
}
