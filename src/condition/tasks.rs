use super::Condition;
use crate::bundle::Bundle;
use crate::error::Result;
use crate::models::Task;
use crate::store::EntityId;
use async_trait::async_trait;

/// Holds once every referenced task reached a terminal state.
///
/// Task states are written by worker processes, so each check re-reads the
/// tasks from the store rather than trusting the cache.
#[derive(Debug, Clone)]
pub struct TasksSettled {
    tasks: Bundle<Task>,
    ids: Vec<EntityId>,
}

impl TasksSettled {
    pub fn new(tasks: Bundle<Task>, ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            tasks,
            ids: ids.into_iter().collect(),
        }
    }

    async fn settled(&self) -> Result<usize> {
        let mut settled = 0;
        for id in &self.ids {
            if self.tasks.refresh(*id).await?.is_terminal() {
                settled += 1;
            }
        }
        Ok(settled)
    }
}

#[async_trait]
impl Condition for TasksSettled {
    async fn check(&self) -> Result<bool> {
        Ok(self.settled().await? == self.ids.len())
    }

    async fn describe(&self) -> String {
        let settled = match self.settled().await {
            Ok(count) => count.to_string(),
            Err(_) => "?".to_string(),
        };
        format!("#settled_tasks[{settled}] >= {}", self.ids.len())
    }
}
