use super::document::EntityId;
use thiserror::Error;

/// Errors surfaced by an [`EntityStore`](super::EntityStore) backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store rejected {operation} on '{collection}': {reason}")]
    Rejected {
        collection: String,
        operation: &'static str,
        reason: String,
    },

    #[error("Duplicate key {id} in collection '{collection}'")]
    DuplicateKey { collection: String, id: EntityId },

    #[error("Document {id} not found in collection '{collection}'")]
    NotFound { collection: String, id: EntityId },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the failure means the backend cannot be reached at all,
    /// as opposed to rejecting one particular operation.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            #[cfg(feature = "postgres")]
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn rejected(
        collection: impl Into<String>,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            collection: collection.into(),
            operation,
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
