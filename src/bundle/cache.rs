//! Cache policies layered above the entity store.
//!
//! A bounded cache evicts in least-recently-used order. Eviction is fully
//! determined by the sequence of accesses, so tests can assert exactly which
//! entries survive.

use crate::store::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// How many loaded entities a bundle keeps in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Every access goes to the store
    None,
    /// Retain every entity ever loaded
    #[default]
    Strong,
    /// Retain at most `n` entities; the least recently used one is evicted
    Bounded(usize),
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Strong => write!(f, "strong"),
            Self::Bounded(capacity) => write!(f, "bounded({capacity})"),
        }
    }
}

/// Size-capped LRU map keyed by entity id
#[derive(Debug, Clone)]
pub struct BoundedCache<T> {
    capacity: usize,
    tick: u64,
    entries: HashMap<EntityId, (T, u64)>,
    recency: BTreeMap<u64, EntityId>,
    evictions: u64,
}

impl<T: Clone> BoundedCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&mut self, id: &EntityId) -> Option<T> {
        let tick = self.next_tick();
        let (value, last) = self.entries.get_mut(id)?;
        self.recency.remove(&*last);
        *last = tick;
        self.recency.insert(tick, *id);
        Some(value.clone())
    }

    /// Insert or replace an entry, returning the ids evicted to make room
    pub fn insert(&mut self, id: EntityId, value: T) -> Vec<EntityId> {
        let tick = self.next_tick();
        if let Some((_, last)) = self.entries.insert(id, (value, tick)) {
            self.recency.remove(&last);
        }
        self.recency.insert(tick, id);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            evicted.push(oldest);
        }
        evicted
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<T> {
        let (value, last) = self.entries.remove(id)?;
        self.recency.remove(&last);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Ids from least to most recently used
    pub fn ids_by_recency(&self) -> Vec<EntityId> {
        self.recency.values().copied().collect()
    }

    fn drain_by_recency(&mut self) -> Vec<(EntityId, T)> {
        let order = std::mem::take(&mut self.recency);
        let mut entries = std::mem::take(&mut self.entries);
        order
            .into_values()
            .filter_map(|id| entries.remove(&id).map(|(value, _)| (id, value)))
            .collect()
    }
}

/// The per-bundle cache, one variant per [`CachePolicy`]
#[derive(Debug)]
pub(crate) enum EntityCache<T> {
    Disabled,
    Strong(HashMap<EntityId, T>),
    Bounded(BoundedCache<T>),
}

impl<T: Clone> EntityCache<T> {
    pub(crate) fn new(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::None => Self::Disabled,
            CachePolicy::Strong => Self::Strong(HashMap::new()),
            CachePolicy::Bounded(capacity) => Self::Bounded(BoundedCache::new(capacity)),
        }
    }

    pub(crate) fn policy(&self) -> CachePolicy {
        match self {
            Self::Disabled => CachePolicy::None,
            Self::Strong(_) => CachePolicy::Strong,
            Self::Bounded(cache) => CachePolicy::Bounded(cache.capacity()),
        }
    }

    pub(crate) fn get(&mut self, id: &EntityId) -> Option<T> {
        match self {
            Self::Disabled => None,
            Self::Strong(map) => map.get(id).cloned(),
            Self::Bounded(cache) => cache.get(id),
        }
    }

    pub(crate) fn insert(&mut self, id: EntityId, value: T) {
        match self {
            Self::Disabled => {}
            Self::Strong(map) => {
                map.insert(id, value);
            }
            Self::Bounded(cache) => {
                cache.insert(id, value);
            }
        }
    }

    pub(crate) fn remove(&mut self, id: &EntityId) {
        match self {
            Self::Disabled => {}
            Self::Strong(map) => {
                map.remove(id);
            }
            Self::Bounded(cache) => {
                cache.remove(id);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Self::Disabled => {}
            Self::Strong(map) => map.clear(),
            Self::Bounded(cache) => cache.clear(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::Strong(map) => map.len(),
            Self::Bounded(cache) => cache.len(),
        }
    }

    /// Switch policy, carrying over as many entries as the new policy holds.
    /// Bounded caches hand over their entries oldest first so the most
    /// recently used ones survive a shrink.
    pub(crate) fn switch(&mut self, policy: CachePolicy) {
        if self.policy() == policy {
            return;
        }
        let entries: Vec<(EntityId, T)> = match std::mem::replace(self, Self::Disabled) {
            Self::Disabled => Vec::new(),
            Self::Strong(map) => map.into_iter().collect(),
            Self::Bounded(mut cache) => cache.drain_by_recency(),
        };
        *self = Self::new(policy);
        for (id, value) in entries {
            self.insert(id, value);
        }
    }
}
