use super::{BoxCondition, Condition};
use crate::bundle::{Bundle, Entity, ViewBundle};
use crate::error::Result;
use async_trait::async_trait;

/// Anything whose current size can be asked for
#[async_trait]
pub trait Countable: Send + Sync {
    async fn count(&self) -> Result<usize>;

    fn label(&self) -> String;
}

#[async_trait]
impl<T: Entity> Countable for Bundle<T> {
    async fn count(&self) -> Result<usize> {
        self.len().await
    }

    fn label(&self) -> String {
        self.kind().to_string()
    }
}

#[async_trait]
impl<T: Entity> Countable for ViewBundle<T> {
    async fn count(&self) -> Result<usize> {
        self.len().await
    }

    fn label(&self) -> String {
        ViewBundle::label(self)
    }
}

/// Holds once `source` has at least `threshold` members
#[derive(Debug, Clone)]
pub struct MinCount<C> {
    source: C,
    threshold: usize,
}

impl<C: Countable + Clone + 'static> MinCount<C> {
    pub fn new(source: C, threshold: usize) -> Self {
        Self { source, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Threshold relative to the current size: holds after `more` additions
    pub async fn more_than_now(source: C, more: usize) -> Result<Self> {
        let now = source.count().await?;
        Ok(Self::new(source, now + more))
    }
}

#[async_trait]
impl<C: Countable + Clone + 'static> Condition for MinCount<C> {
    async fn check(&self) -> Result<bool> {
        Ok(self.source.count().await? >= self.threshold)
    }

    async fn describe(&self) -> String {
        let current = match self.source.count().await {
            Ok(count) => count.to_string(),
            Err(_) => "?".to_string(),
        };
        format!("#{}[{current}] >= {}", self.source.label(), self.threshold)
    }

    fn offset(&self, delta: i64) -> Option<BoxCondition> {
        let threshold = if delta >= 0 {
            self.threshold.saturating_add(delta.unsigned_abs() as usize)
        } else {
            self.threshold.saturating_sub(delta.unsigned_abs() as usize)
        };
        Some(Box::new(Self::new(self.source.clone(), threshold)))
    }
}
