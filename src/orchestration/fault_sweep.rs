//! # Worker Fault Sweep
//!
//! One-shot liveness pass run at the end of every trigger cycle:
//!
//! 1. Every worker that is neither `dead` nor `down` and whose last heartbeat
//!    is older than `dead_time` gets `command = kill`, `state = dead` and its
//!    `current` cleared. The write is a compare-and-set on the observed
//!    `seen`, so a heartbeat landing concurrently wins.
//! 2. Every `queued`/`running` task whose owner is dead, down or unknown is
//!    moved to the dead-worker policy's target state, guarded on the owner
//!    so a task re-claimed meanwhile is left alone.
//!
//! A reclaimed task leaves `queued`/`running`, so repeated sweeps never touch
//! it again. Per-worker failures are logged and retried next cycle; only
//! backend unavailability aborts the sweep.

use super::Clock;
use crate::bundle::{Bundle, Updated};
use crate::constants::fields;
use crate::error::{AdaptiveError, Result};
use crate::logging::log_error;
use crate::models::{LogEntry, LogLevel, Task, Worker};
use crate::state_machine::{
    DeadWorkerPolicy, TaskEvent, TaskState, TaskStateMachine, WorkerEvent, WorkerState,
    WorkerStateMachine,
};
use crate::store::{EntityId, Precondition, Query};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const SWEEP_LOGGER: &str = "adaptive_core::fault_sweep";

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub workers_checked: usize,
    pub workers_killed: Vec<EntityId>,
    /// Stale workers whose heartbeat landed before the kill was written
    pub heartbeats_won: usize,
    pub tasks_reclaimed: Vec<EntityId>,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.workers_killed.is_empty() && self.tasks_reclaimed.is_empty() && self.failures == 0
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSweeper {
    workers: WorkerStateMachine,
    tasks: TaskStateMachine,
    logs: Bundle<LogEntry>,
    clock: Arc<dyn Clock>,
    dead_time: chrono::Duration,
    policy: DeadWorkerPolicy,
}

impl WorkerSweeper {
    pub fn new(
        workers: WorkerStateMachine,
        tasks: TaskStateMachine,
        logs: Bundle<LogEntry>,
        clock: Arc<dyn Clock>,
        dead_time: chrono::Duration,
        policy: DeadWorkerPolicy,
    ) -> Self {
        Self {
            workers,
            tasks,
            logs,
            clock,
            dead_time,
            policy,
        }
    }

    pub fn policy(&self) -> DeadWorkerPolicy {
        self.policy
    }

    #[instrument(skip(self), fields(dead_time = self.dead_time.num_seconds(), policy = %self.policy))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = self.clock.now();

        let workers = self.workers.workers().refreshed().await?;
        let mut states: HashMap<EntityId, WorkerState> =
            workers.iter().map(|w| (w.id, w.state)).collect();

        for worker in workers.iter().filter(|w| w.is_alive()) {
            report.workers_checked += 1;
            if !worker.is_stale(now, self.dead_time) {
                continue;
            }

            match self.kill(worker).await {
                Ok(Updated::Applied(killed)) => {
                    states.insert(killed.id, killed.state);
                    report.workers_killed.push(killed.id);
                    self.record_death(&killed, now - worker.seen).await;
                }
                Ok(Updated::Conflict(current)) => {
                    debug!(worker_id = %worker.id, seen = %current.seen, "heartbeat arrived before kill");
                    states.insert(current.id, current.state);
                    report.heartbeats_won += 1;
                }
                Err(e) if e.is_backend_unavailable() => return Err(e),
                Err(e) => {
                    log_error("fault_sweep", "kill_worker", &e.to_string(), Some(&worker.id.to_string()));
                    report.failures += 1;
                }
            }
        }

        let Some(target) = self.policy.target_state() else {
            return Ok(report);
        };

        for task in self.owned_active_tasks().await? {
            let Some(owner) = task.worker else { continue };
            let owner_alive = states.get(&owner).is_some_and(WorkerState::is_alive);
            if owner_alive {
                continue;
            }

            match self.reclaim(&task, owner, target).await {
                Ok(true) => report.tasks_reclaimed.push(task.id),
                Ok(false) => {}
                Err(e) if e.is_backend_unavailable() => return Err(e),
                Err(e) => {
                    log_error("fault_sweep", "reclaim_task", &e.to_string(), Some(&task.id.to_string()));
                    report.failures += 1;
                }
            }
        }

        if !report.is_quiet() {
            info!(
                killed = report.workers_killed.len(),
                reclaimed = report.tasks_reclaimed.len(),
                failures = report.failures,
                "🩺 Fault sweep finished"
            );
        }
        Ok(report)
    }

    async fn kill(&self, worker: &Worker) -> Result<Updated<Worker>> {
        let guard = Precondition::new().equals(fields::SEEN, serde_json::to_value(worker.seen)?);
        self.workers
            .transition_guarded(worker.id, WorkerEvent::Kill, &guard)
            .await
    }

    async fn owned_active_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.tasks();
        let mut active = tasks
            .find(&Query::eq(fields::STATE, TaskState::Queued.to_string()))
            .await?;
        active.extend(
            tasks
                .find(&Query::eq(fields::STATE, TaskState::Running.to_string()))
                .await?,
        );
        active.retain(|task| task.worker.is_some());
        Ok(active)
    }

    /// Returns false when the task changed hands or settled meanwhile
    async fn reclaim(&self, task: &Task, owner: EntityId, target: TaskState) -> Result<bool> {
        let guard = Precondition::new().equals(fields::WORKER, owner);
        match self
            .tasks
            .transition_guarded(task.id, TaskEvent::Reclaim { to: target }, &guard)
            .await
        {
            Ok(Updated::Applied(_)) => {
                info!(task_id = %task.id, worker_id = %owner, to = %target, "♻️ Reclaimed orphaned task");
                Ok(true)
            }
            Ok(Updated::Conflict(current)) => {
                debug!(task_id = %task.id, state = %current.state, "task changed before reclaim");
                Ok(false)
            }
            Err(AdaptiveError::InvalidTransition { from, .. }) => {
                debug!(task_id = %task.id, state = %from, "task settled before reclaim");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn record_death(&self, worker: &Worker, silence: chrono::Duration) {
        warn!(
            worker_id = %worker.id,
            hostname = %worker.hostname,
            silent_seconds = silence.num_seconds(),
            "💀 Worker declared dead"
        );
        let entry = LogEntry::new(
            SWEEP_LOGGER,
            LogLevel::Warning,
            format!(
                "worker {} on {} declared dead after {}s without heartbeat",
                worker.id,
                worker.hostname,
                silence.num_seconds()
            ),
        );
        if let Err(e) = self.logs.add(entry).await {
            error!(worker_id = %worker.id, error = %e, "failed to persist worker death log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::ManualClock;
    use crate::store::{EntityStore, InMemoryStore};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryStore>,
        workers: Bundle<Worker>,
        tasks: Bundle<Task>,
        logs: Bundle<LogEntry>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            let store = Arc::new(InMemoryStore::new());
            for name in ["workers", "tasks", "logs"] {
                store.ensure_collection(name, name);
            }
            let dyn_store: Arc<dyn EntityStore> = store.clone();
            Self {
                clock,
                workers: Bundle::new(dyn_store.clone(), "workers", Default::default()),
                tasks: Bundle::new(dyn_store.clone(), "tasks", Default::default()),
                logs: Bundle::new(dyn_store, "logs", Default::default()),
                store,
            }
        }

        fn sweeper(&self, policy: DeadWorkerPolicy) -> WorkerSweeper {
            WorkerSweeper::new(
                WorkerStateMachine::new(self.workers.clone()),
                TaskStateMachine::new(self.tasks.clone(), self.clock.clone()),
                self.logs.clone(),
                self.clock.clone(),
                Duration::seconds(60),
                policy,
            )
        }

        async fn running_task_on_worker(&self) -> (Worker, Task) {
            let mut worker = Worker::new("node-1", self.clock.now());
            worker.state = WorkerState::Running;
            let worker = self.workers.add(worker).await.unwrap();

            let mut task = Task::new("simulate", serde_json::json!({}));
            task.state = TaskState::Running;
            task.worker = Some(worker.id);
            let task = self.tasks.add(task).await.unwrap();

            let patch = crate::store::Patch::new().set(fields::CURRENT, task.id);
            self.workers.update(worker.id, &patch, None).await.unwrap();
            (worker, task)
        }
    }

    #[tokio::test]
    async fn test_stale_worker_is_killed_and_task_reset() {
        let fixture = Fixture::new();
        let (worker, task) = fixture.running_task_on_worker().await;
        fixture.clock.advance(Duration::seconds(61));

        let report = fixture.sweeper(DeadWorkerPolicy::Created).sweep().await.unwrap();
        assert_eq!(report.workers_killed, vec![worker.id]);
        assert_eq!(report.tasks_reclaimed, vec![task.id]);

        let worker = fixture.workers.refresh(worker.id).await.unwrap();
        assert_eq!(worker.state, WorkerState::Dead);
        assert_eq!(worker.command, Some(crate::models::WorkerCommand::Kill));
        assert_eq!(worker.current, None);

        let task = fixture.tasks.refresh(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Created);
        assert_eq!(fixture.logs.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_worker_within_dead_time_survives() {
        let fixture = Fixture::new();
        let (worker, _) = fixture.running_task_on_worker().await;
        fixture.clock.advance(Duration::seconds(60));

        let report = fixture.sweeper(DeadWorkerPolicy::Created).sweep().await.unwrap();
        assert!(report.is_quiet());
        assert_eq!(report.workers_checked, 1);
        let worker = fixture.workers.refresh(worker.id).await.unwrap();
        assert_eq!(worker.state, WorkerState::Running);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_reclaim_once() {
        let fixture = Fixture::new();
        let (_, task) = fixture.running_task_on_worker().await;
        fixture.clock.advance(Duration::seconds(120));
        let sweeper = fixture.sweeper(DeadWorkerPolicy::Fail);

        let first = sweeper.sweep().await.unwrap();
        let second = sweeper.sweep().await.unwrap();
        assert_eq!(first.tasks_reclaimed, vec![task.id]);
        assert!(second.is_quiet());
        assert_eq!(second.workers_checked, 0);

        let task = fixture.tasks.refresh(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Fail);
    }

    #[tokio::test]
    async fn test_no_action_policy_only_kills() {
        let fixture = Fixture::new();
        let (_, task) = fixture.running_task_on_worker().await;
        fixture.clock.advance(Duration::seconds(61));

        let report = fixture.sweeper(DeadWorkerPolicy::None).sweep().await.unwrap();
        assert_eq!(report.workers_killed.len(), 1);
        assert!(report.tasks_reclaimed.is_empty());
        let task = fixture.tasks.refresh(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_task_of_unknown_worker_is_reclaimed() {
        let fixture = Fixture::new();
        let mut task = Task::new("simulate", serde_json::json!({}));
        task.state = TaskState::Running;
        task.worker = Some(EntityId::new());
        let task = fixture.tasks.add(task).await.unwrap();

        let report = fixture.sweeper(DeadWorkerPolicy::Created).sweep().await.unwrap();
        assert_eq!(report.tasks_reclaimed, vec![task.id]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_aborts_sweep() {
        let fixture = Fixture::new();
        fixture.running_task_on_worker().await;
        fixture.store.set_available(false);

        let err = fixture
            .sweeper(DeadWorkerPolicy::Created)
            .sweep()
            .await
            .unwrap_err();
        assert!(err.is_backend_unavailable());
    }
}
