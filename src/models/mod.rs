//! Entities stored in a project's collections.

pub mod log_entry;
pub mod model;
pub mod resource_configuration;
pub mod submission;
pub mod task;
pub mod trajectory;
pub mod worker;

pub use log_entry::{LogEntry, LogLevel};
pub use model::Model;
pub use resource_configuration::{ConfigurationSelector, ResourceConfiguration};
pub use submission::Submission;
pub use task::{Task, TaskDescriptor};
pub use trajectory::{FrameRef, Trajectory, TrajectoryNames, TRAJECTORY_TASK_KIND};
pub use worker::{Worker, WorkerCommand};
