//! # Bundles
//!
//! A [`Bundle`] is a cheap, cloneable handle over one store collection of a
//! single entity kind, with a pluggable in-process cache in front of it.
//! [`ViewBundle`] is a read-only filtered view whose membership is always
//! recomputed from the parent's current contents.
//!
//! Every mutation goes to the store before it touches the cache, so a cache
//! never holds an entity the store does not. Reads are served from the cache
//! where possible; `clear_cache` and `reload_indices` force the next
//! iteration to re-synchronize with the store after out-of-process writes.

mod cache;
mod view;

pub use cache::{BoundedCache, CachePolicy};
pub use view::{Predicate, ViewBundle};

use crate::error::{AdaptiveError, Result};
use crate::store::{
    Document, EntityId, EntityStore, InMemoryStore, Patch, Precondition, Query, UpdateOutcome,
};
use cache::EntityCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cache misses above this count are served by one bulk load instead of
/// individual lookups
const MAX_POINT_LOADS: usize = 16;

/// A storable entity kind
pub trait Entity:
    Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug + 'static
{
    /// Short kind name, also the collection suffix (`tasks`, `workers`, ...)
    const KIND: &'static str;

    fn id(&self) -> EntityId;
}

/// Result of a [`Bundle::update`]
#[derive(Debug, Clone, PartialEq)]
pub enum Updated<T> {
    Applied(T),
    /// The precondition did not hold; carries the current stored entity
    Conflict(T),
}

impl<T> Updated<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn entity(&self) -> &T {
        match self {
            Self::Applied(entity) | Self::Conflict(entity) => entity,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Applied(entity) | Self::Conflict(entity) => entity,
        }
    }
}

struct BundleInner<T> {
    collection: String,
    store: Arc<dyn EntityStore>,
    cache: Mutex<EntityCache<T>>,
    resync: AtomicBool,
}

/// Cached handle over one store collection
pub struct Bundle<T: Entity> {
    inner: Arc<BundleInner<T>>,
}

impl<T: Entity> Clone for Bundle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> fmt::Debug for Bundle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("kind", &T::KIND)
            .field("collection", &self.inner.collection)
            .field("backend", &self.inner.store.backend_name())
            .field("caching", &self.caching())
            .finish()
    }
}

impl<T: Entity> Bundle<T> {
    /// Handle over an existing collection
    pub fn new(store: Arc<dyn EntityStore>, collection: impl Into<String>, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(BundleInner {
                collection: collection.into(),
                store,
                cache: Mutex::new(EntityCache::new(policy)),
                resync: AtomicBool::new(false),
            }),
        }
    }

    /// Create the collection if needed and return a handle over it
    pub async fn open(
        store: Arc<dyn EntityStore>,
        collection: impl Into<String>,
        policy: CachePolicy,
    ) -> Result<Self> {
        let collection = collection.into();
        store
            .create_collection(&collection, T::KIND)
            .await
            .map_err(|e| AdaptiveError::store_write(collection.clone(), e))?;
        Ok(Self::new(store, collection, policy))
    }

    /// Bundle over a private in-memory store
    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        store.ensure_collection(T::KIND, T::KIND);
        Self::new(Arc::new(store), T::KIND, CachePolicy::Strong)
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.inner.store
    }

    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    fn read_err(&self, err: crate::store::StoreError) -> AdaptiveError {
        AdaptiveError::store_read(self.inner.collection.clone(), err)
    }

    fn write_err(&self, err: crate::store::StoreError) -> AdaptiveError {
        AdaptiveError::store_write(self.inner.collection.clone(), err)
    }

    fn not_found(id: EntityId) -> AdaptiveError {
        AdaptiveError::NotFound {
            kind: T::KIND.to_string(),
            id,
        }
    }

    fn decode(&self, document: &Document) -> Result<T> {
        Ok(document.decode::<T>()?)
    }

    fn remember(&self, entity: &T) {
        self.inner.cache.lock().insert(entity.id(), entity.clone());
    }

    fn decode_all(&self, documents: &[Document]) -> Result<Vec<T>> {
        let entities = documents
            .iter()
            .map(|doc| self.decode(doc))
            .collect::<Result<Vec<T>>>()?;
        let mut cache = self.inner.cache.lock();
        for entity in &entities {
            cache.insert(entity.id(), entity.clone());
        }
        Ok(entities)
    }

    /// Store one entity, returning it with the store-assigned timestamps
    pub async fn add(&self, entity: T) -> Result<T> {
        let mut stored = self.add_all(vec![entity]).await?;
        stored.pop().ok_or_else(|| {
            self.write_err(crate::store::StoreError::rejected(
                self.inner.collection.clone(),
                "insert",
                "store returned no document",
            ))
        })
    }

    /// Store several entities atomically
    pub async fn add_all(&self, entities: Vec<T>) -> Result<Vec<T>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let documents = entities
            .iter()
            .map(|entity| Document::encode(entity.id(), entity))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let stored = self
            .inner
            .store
            .insert(&self.inner.collection, documents)
            .await
            .map_err(|e| self.write_err(e))?;

        debug!(collection = %self.inner.collection, count = stored.len(), "added entities");
        self.decode_all(&stored)
    }

    /// Fetch by id from the cache, falling back to the store
    pub async fn get(&self, id: EntityId) -> Result<T> {
        self.try_get(id).await?.ok_or_else(|| Self::not_found(id))
    }

    pub async fn try_get(&self, id: EntityId) -> Result<Option<T>> {
        if let Some(entity) = self.inner.cache.lock().get(&id) {
            return Ok(Some(entity));
        }
        self.load(id).await
    }

    async fn load(&self, id: EntityId) -> Result<Option<T>> {
        let document = self
            .inner
            .store
            .get(&self.inner.collection, id)
            .await
            .map_err(|e| self.read_err(e))?;
        match document {
            Some(document) => {
                let entity = self.decode(&document)?;
                self.remember(&entity);
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// Re-read one entity from the store, bypassing and updating the cache
    pub async fn refresh(&self, id: EntityId) -> Result<T> {
        self.load(id).await?.ok_or_else(|| Self::not_found(id))
    }

    pub async fn contains(&self, id: EntityId) -> Result<bool> {
        Ok(self.try_get(id).await?.is_some())
    }

    /// Every entity in insertion order. Cached entities are served from the
    /// cache; misses are loaded from the store.
    pub async fn all(&self) -> Result<Vec<T>> {
        if self.caching() == CachePolicy::None || self.inner.resync.load(Ordering::SeqCst) {
            return self.refreshed().await;
        }

        let ids = self
            .inner
            .store
            .ids(&self.inner.collection)
            .await
            .map_err(|e| self.read_err(e))?;

        let mut slots: Vec<Option<T>> = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        {
            let mut cache = self.inner.cache.lock();
            for (position, id) in ids.iter().enumerate() {
                let hit = cache.get(id);
                if hit.is_none() {
                    misses.push(position);
                }
                slots.push(hit);
            }
        }

        if misses.len() > MAX_POINT_LOADS {
            return self.refreshed().await;
        }
        for position in misses {
            // a document deleted since `ids` was read is skipped
            slots[position] = self.load(ids[position]).await?;
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Reload the whole collection from the store and rebuild the cache
    pub async fn refreshed(&self) -> Result<Vec<T>> {
        let documents = self
            .inner
            .store
            .load_all(&self.inner.collection)
            .await
            .map_err(|e| self.read_err(e))?;
        let entities = documents
            .iter()
            .map(|doc| self.decode(doc))
            .collect::<Result<Vec<T>>>()?;
        {
            let mut cache = self.inner.cache.lock();
            cache.clear();
            for entity in &entities {
                cache.insert(entity.id(), entity.clone());
            }
        }
        self.inner.resync.store(false, Ordering::SeqCst);
        Ok(entities)
    }

    pub async fn len(&self) -> Result<usize> {
        self.count_where(None).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn count_where(&self, query: Option<&Query>) -> Result<usize> {
        self.inner
            .store
            .count(&self.inner.collection, query)
            .await
            .map_err(|e| self.read_err(e))
    }

    pub async fn first(&self) -> Result<Option<T>> {
        Ok(self.all().await?.into_iter().next())
    }

    pub async fn last(&self) -> Result<Option<T>> {
        Ok(self.all().await?.pop())
    }

    /// Entities matching every clause of `query`, answered by the store
    /// (through its index where one exists)
    pub async fn find(&self, query: &Query) -> Result<Vec<T>> {
        let documents = self
            .inner
            .store
            .find(&self.inner.collection, query)
            .await
            .map_err(|e| self.read_err(e))?;
        self.decode_all(&documents)
    }

    /// Entities whose `field` equals `value`
    pub async fn matching(&self, field: &str, value: impl Into<Value>) -> Result<Vec<T>> {
        self.find(&Query::eq(field, value)).await
    }

    /// Live view of the entities whose `field` equals `value`
    pub fn by(&self, field: &str, value: impl Into<Value>) -> ViewBundle<T> {
        ViewBundle::new(self.clone()).by(field, value)
    }

    /// Live view of the entities accepted by `predicate`
    pub fn filter<F>(&self, predicate: F) -> ViewBundle<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        ViewBundle::new(self.clone()).filter(predicate)
    }

    /// Unfiltered view over the whole bundle
    pub fn view(&self) -> ViewBundle<T> {
        ViewBundle::new(self.clone())
    }

    /// Patch one entity. With a precondition this is an atomic
    /// compare-and-set; a failed precondition yields [`Updated::Conflict`].
    pub async fn update(
        &self,
        id: EntityId,
        patch: &Patch,
        precondition: Option<&Precondition>,
    ) -> Result<Updated<T>> {
        let outcome = self
            .inner
            .store
            .update(&self.inner.collection, id, patch, precondition)
            .await
            .map_err(|e| self.write_err(e))?;

        let entity = self.decode(outcome.document())?;
        self.remember(&entity);
        Ok(match outcome {
            UpdateOutcome::Applied(_) => Updated::Applied(entity),
            UpdateOutcome::Conflict(_) => {
                debug!(collection = %self.inner.collection, %id, "update precondition failed");
                Updated::Conflict(entity)
            }
        })
    }

    /// Delete every entity of the collection
    pub async fn delete_all(&self) -> Result<u64> {
        let removed = self
            .inner
            .store
            .delete_all(&self.inner.collection)
            .await
            .map_err(|e| self.write_err(e))?;
        self.inner.cache.lock().clear();
        Ok(removed)
    }

    pub async fn create_index(&self, field: &str) -> Result<()> {
        self.inner
            .store
            .create_index(&self.inner.collection, field)
            .await
            .map_err(|e| self.write_err(e))
    }

    pub fn caching(&self) -> CachePolicy {
        self.inner.cache.lock().policy()
    }

    /// Change the cache policy, keeping whatever the new policy can hold.
    /// Every entity already lives in the store, so nothing is lost.
    pub fn set_caching(&self, policy: CachePolicy) {
        self.inner.cache.lock().switch(policy);
    }

    pub fn cached_len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn is_cached(&self, id: EntityId) -> bool {
        self.inner.cache.lock().get(&id).is_some()
    }

    pub fn forget(&self, id: EntityId) {
        self.inner.cache.lock().remove(&id);
    }

    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }

    /// Make the next iteration do a full reload from the store
    pub fn reload_indices(&self) {
        self.inner.resync.store(true, Ordering::SeqCst);
    }
}
