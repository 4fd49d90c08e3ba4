use super::states::TaskState;
use crate::store::EntityId;
use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Make the task visible to workers; clears any previous owner
    Enqueue,
    /// A worker takes the queued task
    Claim { worker: EntityId },
    /// Undo a claim the worker could not take up; clears the owner
    Release,
    Succeed,
    Fail,
    Halt,
    Cancel,
    /// The owning worker was found dead; move the task per policy
    Reclaim { to: TaskState },
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Claim { .. } => "claim",
            Self::Release => "release",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Halt => "halt",
            Self::Cancel => "cancel",
            Self::Reclaim { .. } => "reclaim",
        }
    }

    /// Event a worker reports to finish a running task in `state`
    pub fn report(state: TaskState) -> Option<Self> {
        match state {
            TaskState::Success => Some(Self::Succeed),
            TaskState::Fail => Some(Self::Fail),
            TaskState::Halt => Some(Self::Halt),
            TaskState::Cancelled => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeed | Self::Fail | Self::Halt | Self::Cancel
        )
    }
}

/// Events that can trigger worker state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Registration finished; ready for work
    Activate,
    StartTask { task: EntityId },
    FinishTask,
    /// The worker stops itself
    Shutdown,
    /// Declared dead by the fault sweep
    Kill,
}

impl WorkerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::StartTask { .. } => "start_task",
            Self::FinishTask => "finish_task",
            Self::Shutdown => "shutdown",
            Self::Kill => "kill",
        }
    }
}
