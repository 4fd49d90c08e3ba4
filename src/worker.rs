//! # Worker Agent
//!
//! The worker side of the store protocol: register, heartbeat, claim a
//! queued task, report its outcome, watch for a `kill` command and shut
//! down. Workers never talk to the orchestrator directly; every step is a
//! compare-and-set against the shared task and worker collections.

use crate::bundle::{Bundle, Updated};
use crate::constants::{defaults::MAX_CAS_ATTEMPTS, fields};
use crate::error::{AdaptiveError, Result};
use crate::models::{Task, Worker, WorkerCommand};
use crate::orchestration::Clock;
use crate::state_machine::{
    TaskEvent, TaskState, TaskStateMachine, WorkerEvent, WorkerState, WorkerStateMachine,
};
use crate::store::{EntityId, Patch, Precondition, Query};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerAgent {
    id: EntityId,
    workers: WorkerStateMachine,
    tasks: TaskStateMachine,
    clock: Arc<dyn Clock>,
}

impl WorkerAgent {
    /// Store a new worker record and mark it idle
    pub async fn register(
        workers: Bundle<Worker>,
        tasks: Bundle<Task>,
        hostname: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let worker = workers.add(Worker::new(hostname, clock.now())).await?;
        let agent = Self {
            id: worker.id,
            workers: WorkerStateMachine::new(workers),
            tasks: TaskStateMachine::new(tasks, clock.clone()),
            clock,
        };
        agent.workers.transition(agent.id, WorkerEvent::Activate).await?;
        info!(worker_id = %agent.id, hostname = %worker.hostname, "👷 Worker registered");
        Ok(agent)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Current worker record from the store
    pub async fn record(&self) -> Result<Worker> {
        self.workers.workers().refresh(self.id).await
    }

    /// Refresh `seen`. Rejected once the worker is dead or down.
    ///
    /// `seen` never moves backwards: a clock reading at or before the
    /// stored one leaves the record as it is.
    pub async fn heartbeat(&self) -> Result<Worker> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let me = self.record().await?;
            if !me.is_alive() {
                return Err(AdaptiveError::InvalidTransition {
                    entity: "worker",
                    from: me.state.to_string(),
                    to: "heartbeat".to_string(),
                });
            }
            let now = self.clock.now();
            if now <= me.seen {
                return Ok(me);
            }

            let patch = Patch::new().set(fields::SEEN, serde_json::to_value(now)?);
            let guard = Precondition::new()
                .one_of(
                    fields::STATE,
                    WorkerState::ALIVE.iter().map(ToString::to_string),
                )
                .equals(fields::SEEN, serde_json::to_value(me.seen)?);
            match self
                .workers
                .workers()
                .update(self.id, &patch, Some(&guard))
                .await?
            {
                Updated::Applied(worker) => return Ok(worker),
                Updated::Conflict(current) => {
                    debug!(worker_id = %self.id, seen = %current.seen, "worker record changed, retrying heartbeat");
                }
            }
        }
        Err(AdaptiveError::Contention {
            entity: "worker",
            id: self.id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Claim a specific queued task. Exactly one of several racing workers
    /// wins; the others get [`AdaptiveError::ClaimRejected`].
    pub async fn claim(&self, task: EntityId) -> Result<Task> {
        let me = self.record().await?;
        if !Self::can_start(me.state) {
            return Err(AdaptiveError::ClaimRejected {
                task,
                reason: format!("worker {} is {}", self.id, me.state),
            });
        }

        let claimed = match self
            .tasks
            .transition(task, TaskEvent::Claim { worker: self.id })
            .await
        {
            Ok(claimed) => claimed,
            Err(AdaptiveError::InvalidTransition { from, .. }) => {
                return Err(AdaptiveError::ClaimRejected {
                    task,
                    reason: format!("task is {from}"),
                })
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .workers
            .transition(self.id, WorkerEvent::StartTask { task })
            .await
        {
            self.release(task).await;
            return Err(match e {
                AdaptiveError::InvalidTransition { from, .. } => AdaptiveError::ClaimRejected {
                    task,
                    reason: format!("worker {} is {from}", self.id),
                },
                other => other,
            });
        }
        debug!(worker_id = %self.id, task_id = %task, "task claimed");
        Ok(claimed)
    }

    /// Only a worker free to run a task may take one
    fn can_start(state: WorkerState) -> bool {
        matches!(state, WorkerState::Registered | WorkerState::Idle)
    }

    /// Put a task claimed in the store back in the queue after the worker
    /// side of the claim failed
    async fn release(&self, task: EntityId) {
        let owned = Precondition::new().equals(fields::WORKER, self.id);
        match self
            .tasks
            .transition_guarded(task, TaskEvent::Release, &owned)
            .await
        {
            Ok(Updated::Applied(_)) => {
                warn!(worker_id = %self.id, task_id = %task, "claim aborted, task released");
            }
            Ok(Updated::Conflict(current)) => {
                debug!(task_id = %task, state = %current.state, "task moved on before release");
            }
            Err(e) => {
                warn!(worker_id = %self.id, task_id = %task, error = %e, "failed to release task");
            }
        }
    }

    /// Claim the oldest queued task anyone else has not taken first
    pub async fn claim_next(&self) -> Result<Option<Task>> {
        let me = self.record().await?;
        if !Self::can_start(me.state) {
            return Err(AdaptiveError::InvalidTransition {
                entity: "worker",
                from: me.state.to_string(),
                to: "claim".to_string(),
            });
        }

        let queued = self
            .tasks
            .tasks()
            .find(&Query::eq(fields::STATE, TaskState::Queued.to_string()))
            .await?;
        for task in queued {
            match self.claim(task.id).await {
                Ok(claimed) => return Ok(Some(claimed)),
                Err(AdaptiveError::ClaimRejected { reason, .. }) => {
                    debug!(task_id = %task.id, %reason, "claim lost, trying next task");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Write the terminal state of a task this worker holds
    pub async fn report(&self, task: EntityId, outcome: TaskState) -> Result<Task> {
        let event = TaskEvent::report(outcome).ok_or_else(|| AdaptiveError::InvalidTransition {
            entity: "task",
            from: TaskState::Running.to_string(),
            to: outcome.to_string(),
        })?;
        let owned = Precondition::new().equals(fields::WORKER, self.id);

        let finished = match self.tasks.transition_guarded(task, event, &owned).await? {
            Updated::Applied(finished) => finished,
            Updated::Conflict(current) => {
                return Err(AdaptiveError::ClaimRejected {
                    task,
                    reason: format!("task is {} and no longer held by {}", current.state, self.id),
                })
            }
        };

        match self.workers.transition(self.id, WorkerEvent::FinishTask).await {
            Ok(_) | Err(AdaptiveError::InvalidTransition { .. }) => {}
            Err(e) => return Err(e),
        }
        Ok(finished)
    }

    /// Pending control signal left by the orchestrator
    pub async fn poll_command(&self) -> Result<Option<WorkerCommand>> {
        Ok(self.record().await?.command)
    }

    /// Stop working; also the acknowledgement of a `kill`
    pub async fn shutdown(&self) -> Result<Worker> {
        let worker = self.workers.transition(self.id, WorkerEvent::Shutdown).await?;
        info!(worker_id = %self.id, "👋 Worker shut down");
        Ok(worker)
    }
}
