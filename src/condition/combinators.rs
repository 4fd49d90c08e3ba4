use super::{BoxCondition, Condition};
use crate::error::{AdaptiveError, Result};
use async_trait::async_trait;

/// Holds when every inner condition holds; empty holds trivially
pub struct AllOf(pub Vec<BoxCondition>);

/// Holds when at least one inner condition holds; empty never holds
pub struct AnyOf(pub Vec<BoxCondition>);

pub struct Not(pub BoxCondition);

pub fn all_of(conditions: Vec<BoxCondition>) -> AllOf {
    AllOf(conditions)
}

pub fn any_of(conditions: Vec<BoxCondition>) -> AnyOf {
    AnyOf(conditions)
}

pub fn not(condition: impl Condition + 'static) -> Not {
    Not(Box::new(condition))
}

async fn describe_all(conditions: &[BoxCondition], joiner: &str) -> String {
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
        parts.push(condition.describe().await);
    }
    format!("({})", parts.join(joiner))
}

fn offset_all(conditions: &[BoxCondition], delta: i64) -> Option<Vec<BoxCondition>> {
    conditions.iter().map(|c| c.offset(delta)).collect()
}

#[async_trait]
impl Condition for AllOf {
    async fn check(&self) -> Result<bool> {
        for condition in &self.0 {
            if !condition.check().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn describe(&self) -> String {
        describe_all(&self.0, " & ").await
    }

    fn offset(&self, delta: i64) -> Option<BoxCondition> {
        offset_all(&self.0, delta).map(|inner| Box::new(AllOf(inner)) as BoxCondition)
    }
}

#[async_trait]
impl Condition for AnyOf {
    async fn check(&self) -> Result<bool> {
        for condition in &self.0 {
            if condition.check().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn describe(&self) -> String {
        describe_all(&self.0, " | ").await
    }

    fn offset(&self, delta: i64) -> Option<BoxCondition> {
        offset_all(&self.0, delta).map(|inner| Box::new(AnyOf(inner)) as BoxCondition)
    }
}

#[async_trait]
impl Condition for Not {
    async fn check(&self) -> Result<bool> {
        Ok(!self.0.check().await?)
    }

    async fn describe(&self) -> String {
        format!("!{}", self.0.describe().await)
    }
}

/// Condition backed by an author-supplied closure
pub struct FnCondition<F> {
    description: String,
    predicate: F,
}

pub fn from_fn<F>(description: impl Into<String>, predicate: F) -> FnCondition<F>
where
    F: Fn() -> anyhow::Result<bool> + Send + Sync,
{
    FnCondition {
        description: description.into(),
        predicate,
    }
}

#[async_trait]
impl<F> Condition for FnCondition<F>
where
    F: Fn() -> anyhow::Result<bool> + Send + Sync,
{
    async fn check(&self) -> Result<bool> {
        (self.predicate)().map_err(|e| {
            AdaptiveError::EventAction(format!("condition '{}' failed: {e:#}", self.description))
        })
    }

    async fn describe(&self) -> String {
        self.description.clone()
    }
}
