//! # Entity Store Adapter
//!
//! Typed, indexed persistent collections consumed by [`Bundle`](crate::bundle::Bundle).
//!
//! The orchestrator relies on exactly the operations of [`EntityStore`]:
//! collection management, bulk insert, key lookup, equality `find` (backed by
//! an index where one was declared), and single-document `update` with an
//! optional [`Precondition`]. The precondition is the compare-and-set
//! primitive that resolves cross-process races such as two workers claiming
//! the same queued task; the orchestrator never re-implements it with its own
//! lock.
//!
//! Two backends ship with the crate:
//!
//! - [`InMemoryStore`]: process-local reference backend, also used for tests
//! - [`PgStore`](postgres::PgStore): PostgreSQL JSONB documents (feature `postgres`)

mod document;
mod errors;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod query;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use document::{Document, EntityId, CREATED_FIELD, MODIFIED_FIELD};
pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use query::{Expectation, Patch, Precondition, Query, UpdateOutcome};

/// Name and entity kind of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub kind: String,
}

/// Persistent, indexed document collections
#[async_trait]
pub trait EntityStore: Send + Sync + fmt::Debug {
    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Create a collection; creating an existing collection is a no-op
    async fn create_collection(&self, name: &str, kind: &str) -> StoreResult<()>;

    async fn list_collections(&self) -> StoreResult<Vec<CollectionInfo>>;

    /// Remove a collection with all of its documents
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Declare an equality index on a (dotted) field path
    async fn create_index(&self, collection: &str, field: &str) -> StoreResult<()>;

    /// Insert documents atomically: either all are stored or none.
    /// Returns the documents as stamped by the store.
    async fn insert(&self, collection: &str, documents: Vec<Document>)
        -> StoreResult<Vec<Document>>;

    async fn get(&self, collection: &str, id: EntityId) -> StoreResult<Option<Document>>;

    /// Ids of every document, in insertion order
    async fn ids(&self, collection: &str) -> StoreResult<Vec<EntityId>>;

    /// Every document, in insertion order
    async fn load_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: &str, query: Option<&Query>) -> StoreResult<usize>;

    /// Apply a patch to one document. Without a precondition the write is
    /// last-write-wins; with one it is an atomic compare-and-set.
    async fn update(
        &self,
        collection: &str,
        id: EntityId,
        patch: &Patch,
        precondition: Option<&Precondition>,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete every document in a collection, returning how many were removed
    async fn delete_all(&self, collection: &str) -> StoreResult<u64>;
}
