use crate::store::EntityId;
use thiserror::Error;

/// State machine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
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
}

/// Result type for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
