use super::{Bundle, Entity};
use crate::error::Result;
use crate::store::{EntityId, Query};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// In-process filter applied to each entity of a view
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Read-only view over a parent [`Bundle`].
///
/// Equality selectors are pushed down to the store; predicates run in
/// process on whatever the store returns. Nothing is materialized until the
/// view is read, and every read reflects the parent's current contents.
pub struct ViewBundle<T: Entity> {
    parent: Bundle<T>,
    selector: Query,
    predicates: Vec<Predicate<T>>,
    label: Option<String>,
}

impl<T: Entity> Clone for ViewBundle<T> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            selector: self.selector.clone(),
            predicates: self.predicates.clone(),
            label: self.label.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for ViewBundle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewBundle")
            .field("collection", &self.parent.collection())
            .field("selector", &self.selector)
            .field("predicates", &self.predicates.len())
            .field("label", &self.label)
            .finish()
    }
}

impl<T: Entity> ViewBundle<T> {
    pub fn new(parent: Bundle<T>) -> Self {
        Self {
            parent,
            selector: Query::default(),
            predicates: Vec::new(),
            label: None,
        }
    }

    pub fn parent(&self) -> &Bundle<T> {
        &self.parent
    }

    pub fn selector(&self) -> &Query {
        &self.selector
    }

    /// Name used when describing conditions over this view
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.parent.kind().to_string())
    }

    pub fn by(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.selector = self.selector.and(field, value);
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    fn accepts(&self, entity: &T) -> bool {
        self.predicates.iter().all(|predicate| predicate(entity))
    }

    pub async fn all(&self) -> Result<Vec<T>> {
        let candidates = if self.selector.is_empty() {
            self.parent.all().await?
        } else {
            self.parent.find(&self.selector).await?
        };
        Ok(candidates
            .into_iter()
            .filter(|entity| self.accepts(entity))
            .collect())
    }

    /// Size of the view; a pure selector view is counted by the store
    pub async fn len(&self) -> Result<usize> {
        if self.predicates.is_empty() {
            let query = (!self.selector.is_empty()).then_some(&self.selector);
            return self.parent.count_where(query).await;
        }
        Ok(self.all().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn ids(&self) -> Result<Vec<EntityId>> {
        Ok(self.all().await?.iter().map(|entity| entity.id()).collect())
    }

    pub async fn contains(&self, id: EntityId) -> Result<bool> {
        Ok(self.all().await?.iter().any(|entity| entity.id() == id))
    }

    pub async fn first(&self) -> Result<Option<T>> {
        Ok(self.all().await?.into_iter().next())
    }

    pub async fn last(&self) -> Result<Option<T>> {
        Ok(self.all().await?.pop())
    }
}
