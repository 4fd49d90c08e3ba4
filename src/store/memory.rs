//! Process-local reference backend.
//!
//! Collections live in a [`DashMap`]; each collection is guarded by its own
//! `RwLock`, so every single-document update (including compare-and-set) is
//! atomic with respect to every other operation on that collection.

use super::{
    CollectionInfo, Document, EntityId, EntityStore, Patch, Precondition, Query, StoreError,
    StoreResult, UpdateOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Collection {
    kind: String,
    documents: HashMap<EntityId, Document>,
    sequence: HashMap<EntityId, u64>,
    next_sequence: u64,
    /// field path -> canonical value -> ids
    indices: HashMap<String, HashMap<String, Vec<EntityId>>>,
}

impl Collection {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    fn index_key(document: &Document, field: &str) -> String {
        document.field(field).unwrap_or(&Value::Null).to_string()
    }

    fn index_document(&mut self, document: &Document) {
        for (field, buckets) in self.indices.iter_mut() {
            buckets
                .entry(Self::index_key(document, field))
                .or_default()
                .push(document.id);
        }
    }

    fn unindex_document(&mut self, document: &Document) {
        for (field, buckets) in self.indices.iter_mut() {
            if let Some(bucket) = buckets.get_mut(&Self::index_key(document, field)) {
                bucket.retain(|id| *id != document.id);
            }
        }
    }

    fn ordered(&self, mut documents: Vec<Document>) -> Vec<Document> {
        documents.sort_by_key(|doc| self.sequence.get(&doc.id).copied().unwrap_or(u64::MAX));
        documents
    }

    fn all(&self) -> Vec<Document> {
        self.ordered(self.documents.values().cloned().collect())
    }
}

/// In-memory [`EntityStore`] with declared equality indices
#[derive(Debug)]
pub struct InMemoryStore {
    collections: DashMap<String, Arc<RwLock<Collection>>>,
    available: AtomicBool,
    index_lookups: AtomicU64,
    full_scans: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            available: AtomicBool::new(true),
            index_lookups: AtomicU64::new(0),
            full_scans: AtomicU64::new(0),
        }
    }

    /// Synchronous variant of `create_collection`
    pub fn ensure_collection(&self, name: &str, kind: &str) {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::new(kind))));
    }

    /// Simulate losing (or regaining) the backend; while unavailable every
    /// operation fails with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `find`/`count` calls answered from an index
    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    /// Number of `find`/`count` calls answered by a linear scan
    pub fn full_scans(&self) -> u64 {
        self.full_scans.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("in-memory store switched off"))
        }
    }

    fn collection(&self, name: &str) -> StoreResult<Arc<RwLock<Collection>>> {
        self.check_available()?;
        self.collections
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    fn matching(&self, collection: &Collection, query: &Query) -> Vec<Document> {
        let indexed = query
            .clauses()
            .iter()
            .find(|(field, _)| collection.indices.contains_key(field.as_str()));

        match indexed {
            Some((field, value)) => {
                self.index_lookups.fetch_add(1, Ordering::Relaxed);
                let candidates: Vec<Document> = collection
                    .indices
                    .get(field.as_str())
                    .and_then(|buckets| buckets.get(&value.to_string()))
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| collection.documents.get(id))
                            .filter(|doc| query.matches(doc))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                collection.ordered(candidates)
            }
            None => {
                self.full_scans.fetch_add(1, Ordering::Relaxed);
                collection
                    .all()
                    .into_iter()
                    .filter(|doc| query.matches(doc))
                    .collect()
            }
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_collection(&self, name: &str, kind: &str) -> StoreResult<()> {
        self.check_available()?;
        self.ensure_collection(name, kind);
        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<CollectionInfo>> {
        self.check_available()?;
        let mut collections: Vec<CollectionInfo> = self
            .collections
            .iter()
            .map(|entry| CollectionInfo {
                name: entry.key().clone(),
                kind: entry.value().read().kind.clone(),
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.check_available()?;
        self.collections.remove(name);
        Ok(())
    }

    async fn create_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        let collection = self.collection(collection)?;
        let mut guard = collection.write();
        if guard.indices.contains_key(field) {
            return Ok(());
        }

        let mut buckets: HashMap<String, Vec<EntityId>> = HashMap::new();
        for doc in guard.all() {
            buckets
                .entry(Collection::index_key(&doc, field))
                .or_default()
                .push(doc.id);
        }
        guard.indices.insert(field.to_string(), buckets);
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<Document>> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write();

        for (position, doc) in documents.iter().enumerate() {
            let repeated = documents[..position].iter().any(|other| other.id == doc.id);
            if repeated || guard.documents.contains_key(&doc.id) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    id: doc.id,
                });
            }
        }

        let now = Utc::now();
        let mut stored = Vec::with_capacity(documents.len());
        for mut doc in documents {
            doc.created = Some(now);
            doc.modified = Some(now);
            let sequence = guard.next_sequence;
            guard.next_sequence += 1;
            guard.sequence.insert(doc.id, sequence);
            guard.index_document(&doc);
            guard.documents.insert(doc.id, doc.clone());
            stored.push(doc);
        }

        debug!(collection, inserted = stored.len(), "memory store insert");
        Ok(stored)
    }

    async fn get(&self, collection: &str, id: EntityId) -> StoreResult<Option<Document>> {
        let handle = self.collection(collection)?;
        let guard = handle.read();
        Ok(guard.documents.get(&id).cloned())
    }

    async fn ids(&self, collection: &str) -> StoreResult<Vec<EntityId>> {
        let handle = self.collection(collection)?;
        let guard = handle.read();
        let mut ids: Vec<(u64, EntityId)> = guard
            .sequence
            .iter()
            .map(|(id, sequence)| (*sequence, *id))
            .collect();
        ids.sort_unstable();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn load_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let handle = self.collection(collection)?;
        let guard = handle.read();
        Ok(guard.all())
    }

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let handle = self.collection(collection)?;
        let guard = handle.read();
        Ok(self.matching(&guard, query))
    }

    async fn count(&self, collection: &str, query: Option<&Query>) -> StoreResult<usize> {
        let handle = self.collection(collection)?;
        let guard = handle.read();
        match query {
            Some(query) if !query.is_empty() => Ok(self.matching(&guard, query).len()),
            _ => Ok(guard.documents.len()),
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: EntityId,
        patch: &Patch,
        precondition: Option<&Precondition>,
    ) -> StoreResult<UpdateOutcome> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write();

        let current = guard
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id,
            })?;

        if let Some(precondition) = precondition {
            if !precondition.holds(&current) {
                return Ok(UpdateOutcome::Conflict(current));
            }
        }

        let mut updated = current.clone();
        patch.apply(&mut updated);
        updated.modified = Some(Utc::now());

        guard.unindex_document(&current);
        guard.index_document(&updated);
        guard.documents.insert(id, updated.clone());

        Ok(UpdateOutcome::Applied(updated))
    }

    async fn delete_all(&self, collection: &str) -> StoreResult<u64> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write();
        let removed = guard.documents.len() as u64;
        guard.documents.clear();
        guard.sequence.clear();
        for buckets in guard.indices.values_mut() {
            buckets.clear();
        }
        Ok(removed)
    }
}
