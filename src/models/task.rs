use crate::bundle::Entity;
use crate::constants::kinds;
use crate::state_machine::TaskState;
use crate::store::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a task runs. Opaque to the scheduler apart from the optional
/// resource it is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub resource: Option<String>,
}

/// A unit of remote work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub descriptor: TaskDescriptor,
    #[serde(default)]
    pub state: TaskState,
    /// Worker currently holding the task
    #[serde(default)]
    pub worker: Option<EntityId>,
    #[serde(default)]
    pub state_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: EntityId::new(),
            descriptor: TaskDescriptor {
                kind: kind.into(),
                payload,
                resource: None,
            },
            state: TaskState::Created,
            worker: None,
            state_changed_at: None,
            created: None,
            modified: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.descriptor.resource = Some(resource.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_owned_by(&self, worker: EntityId) -> bool {
        self.worker == Some(worker)
    }
}

impl Entity for Task {
    const KIND: &'static str = kinds::TASKS;

    fn id(&self) -> EntityId {
        self.id
    }
}
