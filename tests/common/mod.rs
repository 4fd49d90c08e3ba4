//! Shared fixtures for integration tests

#![allow(dead_code)]

use adaptive_core::config::AdaptiveConfig;
use adaptive_core::models::{FrameRef, Task, Trajectory};
use adaptive_core::orchestration::ManualClock;
use adaptive_core::store::{EntityStore, InMemoryStore};
use adaptive_core::{Project, WorkerAgent};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn simulate_task(label: &str) -> Task {
    Task::new("simulate", serde_json::json!({ "label": label }))
}

/// A project on a private in-memory store with a hand-driven clock
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub project: Project,
}

impl Harness {
    pub async fn new(name: &str) -> Self {
        Self::with_config(AdaptiveConfig::for_project(name)).await
    }

    pub async fn with_config(config: AdaptiveConfig) -> Self {
        let clock = ManualClock::new(start_time());
        let store = Arc::new(InMemoryStore::new());
        let project = Project::open_with(
            config,
            store.clone() as Arc<dyn EntityStore>,
            clock.clone(),
        )
        .await
        .unwrap();
        Self {
            clock,
            store,
            project,
        }
    }

    pub async fn agent(&self, hostname: &str) -> WorkerAgent {
        WorkerAgent::register(
            self.project.workers().clone(),
            self.project.tasks().clone(),
            hostname,
            self.clock.clone(),
        )
        .await
        .unwrap()
    }

    /// Store `n` trajectories whose files already exist
    pub async fn produce_trajectories(&self, n: usize) -> Vec<Trajectory> {
        let produced = self
            .project
            .new_trajectory(FrameRef::new("input.pdb", 0), 100, Some("openmm".into()), n)
            .into_iter()
            .map(|mut trajectory| {
                trajectory.exists = true;
                trajectory
            })
            .collect();
        self.project
            .all_trajectories()
            .add_all(produced)
            .await
            .unwrap()
    }
}
