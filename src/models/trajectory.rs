use crate::bundle::Entity;
use crate::constants::{kinds, TRAJECTORY_LOCATION_PREFIX};
use crate::error::{AdaptiveError, Result};
use crate::models::Task;
use crate::store::EntityId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Task kind of the work item that produces a trajectory
pub const TRAJECTORY_TASK_KIND: &str = "trajectory";

/// Initial coordinates of a trajectory: a frame of some existing file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    pub source: String,
    #[serde(default)]
    pub index: u64,
}

impl FrameRef {
    pub fn new(source: impl Into<String>, index: u64) -> Self {
        Self {
            source: source.into(),
            index,
        }
    }
}

/// A trajectory file, requested or already produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: EntityId,
    pub location: String,
    pub frame: FrameRef,
    pub length: u64,
    /// Engine that generates it; a trajectory without one cannot be run
    #[serde(default)]
    pub engine: Option<String>,
    /// Whether the file has been produced
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Trajectory {
    pub fn new(
        location: impl Into<String>,
        frame: FrameRef,
        length: u64,
        engine: Option<String>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            location: location.into(),
            frame,
            length,
            engine,
            exists: false,
            created: None,
            modified: None,
        }
    }

    /// Canonical task that produces this trajectory
    pub fn run(&self, resource: Option<&str>) -> Result<Task> {
        let engine = self.engine.as_deref().ok_or_else(|| {
            AdaptiveError::InvalidSubmission(format!(
                "trajectory {} has no engine",
                self.location
            ))
        })?;

        let mut task = Task::new(
            TRAJECTORY_TASK_KIND,
            json!({
                "trajectory": self.id,
                "location": self.location,
                "frame": self.frame,
                "length": self.length,
                "engine": engine,
            }),
        );
        task.descriptor.resource = resource.map(str::to_string);
        Ok(task)
    }

    /// Sequence number parsed from a generated location, if it is one
    pub fn number(&self) -> Option<u64> {
        self.location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse().ok())
    }
}

impl Entity for Trajectory {
    const KIND: &'static str = kinds::TRAJECTORIES;

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Generator of unused trajectory locations
/// `sandbox:///projects/<project>/trajs/<n:08>/`
#[derive(Debug)]
pub struct TrajectoryNames {
    project: String,
    next: Mutex<u64>,
}

impl TrajectoryNames {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            next: Mutex::new(0),
        }
    }

    /// Continue numbering after the highest number already in use
    pub fn initialize_from<'a>(&self, existing: impl IntoIterator<Item = &'a Trajectory>) {
        let highest = existing.into_iter().filter_map(Trajectory::number).max();
        if let Some(highest) = highest {
            let mut next = self.next.lock();
            *next = (*next).max(highest + 1);
        }
    }

    pub fn location(&self, number: u64) -> String {
        format!(
            "{TRAJECTORY_LOCATION_PREFIX}/{}/trajs/{number:08}/",
            self.project
        )
    }

    pub fn next_location(&self) -> String {
        let mut next = self.next.lock();
        let location = self.location(*next);
        *next += 1;
        location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_continue_after_existing() {
        let names = TrajectoryNames::new("alanine");
        assert_eq!(
            names.next_location(),
            "sandbox:///projects/alanine/trajs/00000000/"
        );

        let existing = Trajectory::new(
            names.location(41),
            FrameRef::new("input.pdb", 0),
            100,
            None,
        );
        assert_eq!(existing.number(), Some(41));

        names.initialize_from([&existing]);
        assert_eq!(
            names.next_location(),
            "sandbox:///projects/alanine/trajs/00000042/"
        );
    }

    #[test]
    fn test_run_requires_engine() {
        let mut traj = Trajectory::new("file://x/", FrameRef::new("input.pdb", 0), 10, None);
        assert!(matches!(
            traj.run(None),
            Err(AdaptiveError::InvalidSubmission(_))
        ));

        traj.engine = Some("openmm".to_string());
        let task = traj.run(Some("cluster")).unwrap();
        assert_eq!(task.kind(), TRAJECTORY_TASK_KIND);
        assert_eq!(task.descriptor.resource.as_deref(), Some("cluster"));
        assert_eq!(task.descriptor.payload["length"], 10);
        assert_eq!(task.descriptor.payload["trajectory"], traj.id.to_string());
    }
}
