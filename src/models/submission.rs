use super::{Task, Trajectory};
use crate::error::Result;

/// A work item accepted by `queue` and by event emissions. Every variant
/// converts into one canonical [`Task`] before it reaches the task bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Task(Task),
    /// A requested trajectory; converted into the task that produces it
    Trajectory(Trajectory),
}

impl Submission {
    /// Convert into the task to store. `resource` applies only to tasks
    /// that are not bound to one already.
    pub fn into_task(self, resource: Option<&str>) -> Result<Task> {
        match self {
            Self::Task(mut task) => {
                if task.descriptor.resource.is_none() {
                    task.descriptor.resource = resource.map(str::to_string);
                }
                Ok(task)
            }
            Self::Trajectory(trajectory) => trajectory.run(resource),
        }
    }
}

impl From<Task> for Submission {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<Trajectory> for Submission {
    fn from(trajectory: Trajectory) -> Self {
        Self::Trajectory(trajectory)
    }
}
