use crate::config::ConfigurationError;
use crate::state_machine::errors::StateMachineError;
use crate::store::{EntityId, StoreError};
use thiserror::Error;

/// Crate-level error taxonomy surfaced to workflow authors and drivers
#[derive(Error, Debug)]
pub enum AdaptiveError {
    #[error("Store write failed on '{collection}': {source}")]
    StoreWrite {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("Store read failed on '{collection}': {source}")]
    StoreRead {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: EntityId },

    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Claim of task {task} rejected: {reason}")]
    ClaimRejected { task: EntityId, reason: String },

    #[error("Concurrent modification of {entity} {id} after {attempts} attempts")]
    Contention {
        entity: &'static str,
        id: EntityId,
        attempts: usize,
    },

    #[error("Configuration selection error: {0}")]
    ConfigurationSelection(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Event action failed: {0}")]
    EventAction(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdaptiveError {
    pub fn store_write(collection: impl Into<String>, source: StoreError) -> Self {
        match source {
            StoreError::NotFound { collection, id } => Self::NotFound { kind: collection, id },
            source => Self::StoreWrite {
                collection: collection.into(),
                source,
            },
        }
    }

    pub fn store_read(collection: impl Into<String>, source: StoreError) -> Self {
        match source {
            StoreError::NotFound { collection, id } => Self::NotFound { kind: collection, id },
            source => Self::StoreRead {
                collection: collection.into(),
                source,
            },
        }
    }

    /// Whether the backend itself is unreachable. This is the only error
    /// class allowed to escape a trigger cycle.
    pub fn is_backend_unavailable(&self) -> bool {
        match self {
            Self::StoreWrite { source, .. } | Self::StoreRead { source, .. } => {
                source.is_unavailable()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// An insert hit an id that is already stored
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            Self::StoreWrite {
                source: StoreError::DuplicateKey { .. },
                ..
            }
        )
    }
}

impl From<StateMachineError> for AdaptiveError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition { entity, from, to } => {
                Self::InvalidTransition { entity, from, to }
            }
            StateMachineError::ClaimRejected { task, reason } => {
                Self::ClaimRejected { task, reason }
            }
            StateMachineError::Contention { entity, id, attempts } => {
                Self::Contention { entity, id, attempts }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AdaptiveError>;
