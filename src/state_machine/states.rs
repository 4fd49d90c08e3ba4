use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a unit of remote work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Emitted by workflow logic, not yet visible to workers
    #[default]
    Created,
    /// Waiting for a worker to claim it
    Queued,
    /// Claimed and executing on its worker
    Running,
    Success,
    Fail,
    /// Stopped by the worker before completion
    Halt,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        Self::Created,
        Self::Queued,
        Self::Running,
        Self::Success,
        Self::Fail,
        Self::Halt,
        Self::Cancelled,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Fail | Self::Halt | Self::Cancelled
        )
    }

    /// Queued or running tasks are owned (or about to be) by a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
            Self::Halt => write!(f, "halt"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            "halt" => Ok(Self::Halt),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Lifecycle of a remote execution agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Registered,
    Idle,
    Running,
    /// Shut down by the worker itself
    Down,
    /// Declared dead by the fault sweep after a missed heartbeat
    Dead,
}

impl WorkerState {
    pub const ALIVE: [WorkerState; 3] = [Self::Registered, Self::Idle, Self::Running];

    /// A worker that may still heartbeat and take tasks
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Registered | Self::Idle | Self::Running)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Down => write!(f, "down"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(Self::Registered),
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "down" => Ok(Self::Down),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("Invalid worker state: {s}")),
        }
    }
}

/// What the fault sweep does with queued/running tasks of a dead worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadWorkerPolicy {
    /// Reset to `created` so the task is retried
    #[default]
    Created,
    /// Mark the task failed
    Fail,
    /// Leave the task untouched
    None,
}

impl DeadWorkerPolicy {
    pub fn target_state(&self) -> Option<TaskState> {
        match self {
            Self::Created => Some(TaskState::Created),
            Self::Fail => Some(TaskState::Fail),
            Self::None => None,
        }
    }
}

impl fmt::Display for DeadWorkerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Fail => write!(f, "fail"),
            Self::None => write!(f, "none"),
        }
    }
}
