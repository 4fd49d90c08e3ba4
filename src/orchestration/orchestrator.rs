//! # Orchestrator
//!
//! The single scheduling entry point. [`Orchestrator::trigger`] holds the
//! orchestrator lock for the whole cycle and:
//!
//! 1. retries tasks left in the emission outbox by an earlier failed commit,
//! 2. re-queues tasks the fault sweep reset to `created`,
//! 3. advances every registered event once per pass, in registration order,
//!    retiring finished events, for at most `max_trigger_iterations` passes
//!    and only while some event made progress,
//! 4. runs the worker fault sweep once.
//!
//! The lock only guards orchestrator-local bookkeeping (events and outbox).
//! Races with worker processes are settled by compare-and-set in the store.

use super::fault_sweep::{SweepReport, WorkerSweeper};
use super::Clock;
use crate::bundle::{Bundle, Updated};
use crate::config::OrchestratorConfig;
use crate::constants::{defaults::MAX_COMMIT_ATTEMPTS, fields};
use crate::error::{AdaptiveError, Result};
use crate::events::{BoxEvent, Emission, EventId, EventInput};
use crate::logging::log_event_operation;
use crate::models::{LogEntry, Submission, Task, Worker};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine, WorkerStateMachine};
use crate::store::{Precondition, Query};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Handle returned for every event admitted by [`Orchestrator::add_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHandle {
    pub id: EventId,
    pub description: String,
}

/// What one trigger cycle did
#[derive(Debug, Clone, Default)]
pub struct TriggerReport {
    /// Event-advancement passes run; never above `max_trigger_iterations`
    pub iterations: usize,
    pub events_advanced: usize,
    pub events_progressed: usize,
    pub events_retired: usize,
    pub events_failed: usize,
    pub events_registered: usize,
    pub tasks_submitted: usize,
    pub tasks_requeued: usize,
    /// Tasks still waiting in the outbox after the cycle
    pub outbox_pending: usize,
    /// Outbox tasks given up on after `MAX_COMMIT_ATTEMPTS` rejected commits
    pub tasks_dropped: usize,
    /// Whether the loop stopped on the iteration bound with work still flowing
    pub iteration_limit_hit: bool,
    pub sweep: SweepReport,
}

impl TriggerReport {
    pub fn made_progress(&self) -> bool {
        self.events_progressed > 0 || self.tasks_submitted > 0 || self.tasks_requeued > 0
    }
}

struct RegisteredEvent {
    id: EventId,
    event: BoxEvent,
}

struct PendingTask {
    task: Task,
    /// Commits the store rejected for a reason other than being unavailable
    rejections: usize,
}

#[derive(Default)]
struct OrchestratorState {
    events: Vec<RegisteredEvent>,
    /// Tasks emitted by an event but not yet committed to the store
    outbox: VecDeque<PendingTask>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    tasks: TaskStateMachine,
    sweeper: WorkerSweeper,
    /// Resource name applied to submissions that carry none
    resource: RwLock<Option<String>>,
    state: Mutex<OrchestratorState>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("resource", &*self.resource.read())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        tasks: Bundle<Task>,
        workers: Bundle<Worker>,
        logs: Bundle<LogEntry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let task_machine = TaskStateMachine::new(tasks, clock.clone());
        let sweeper = WorkerSweeper::new(
            WorkerStateMachine::new(workers),
            task_machine.clone(),
            logs,
            clock,
            config.dead_time(),
            config.dead_worker_policy,
        );
        Self {
            config,
            tasks: task_machine,
            sweeper,
            resource: RwLock::new(None),
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn set_resource(&self, resource: Option<String>) {
        *self.resource.write() = resource;
    }

    pub fn resource(&self) -> Option<String> {
        self.resource.read().clone()
    }

    /// Register events and immediately run one trigger cycle
    pub async fn add_event(&self, input: impl Into<EventInput>) -> Result<Vec<EventHandle>> {
        let mut state = self.state.lock().await;
        let mut handles = Vec::new();
        for event in input.into().into_events() {
            handles.push(Self::register(&mut state, event).await);
        }
        self.trigger_locked(&mut state).await?;
        Ok(handles)
    }

    async fn register(state: &mut OrchestratorState, event: BoxEvent) -> EventHandle {
        let id = EventId::new();
        let description = event.describe().await;
        log_event_operation("register", &id.to_string(), "pending", Some(&description));
        state.events.push(RegisteredEvent { id, event });
        EventHandle { id, description }
    }

    /// Drop an event from future cycles; false when it already retired
    pub async fn remove_event(&self, id: EventId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|registered| registered.id != id);
        let removed = state.events.len() < before;
        if removed {
            log_event_operation("remove", &id.to_string(), "removed", None);
        }
        removed
    }

    pub async fn is_registered(&self, id: EventId) -> bool {
        self.state.lock().await.events.iter().any(|r| r.id == id)
    }

    pub async fn pending_events(&self) -> usize {
        self.state.lock().await.events.len()
    }

    pub async fn events_done(&self) -> bool {
        self.pending_events().await == 0
    }

    pub async fn outbox_len(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    /// Convert submissions to tasks, store them and enqueue them
    pub async fn queue(&self, submissions: Vec<Submission>) -> Result<Vec<Task>> {
        let resource = self.resource();
        let mut queued = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let task = submission.into_task(resource.as_deref())?;
            queued.push(self.commit(task).await?);
        }
        Ok(queued)
    }

    /// Run one cycle, waiting for a concurrent cycle to finish first
    pub async fn trigger(&self) -> Result<TriggerReport> {
        let mut state = self.state.lock().await;
        self.trigger_locked(&mut state).await
    }

    /// Run one cycle unless another one is in flight
    pub async fn try_trigger(&self) -> Result<Option<TriggerReport>> {
        match self.state.try_lock() {
            Ok(mut state) => Ok(Some(self.trigger_locked(&mut state).await?)),
            Err(_) => {
                debug!("trigger already running, skipping");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, state), fields(events = state.events.len()))]
    async fn trigger_locked(&self, state: &mut OrchestratorState) -> Result<TriggerReport> {
        let mut report = TriggerReport::default();

        self.flush_outbox(state, &mut report).await?;
        if self.config.requeue_reclaimed_tasks {
            report.tasks_requeued = self.requeue_reclaimed().await?;
        }

        let mut budget = self.config.max_trigger_iterations;
        loop {
            if budget == 0 {
                report.iteration_limit_hit = true;
                warn!(
                    max_iterations = self.config.max_trigger_iterations,
                    pending = state.events.len(),
                    "⚠️ Trigger iteration bound reached, remaining work deferred to next cycle"
                );
                break;
            }
            budget -= 1;
            report.iterations += 1;

            let progressed = self.advance_all(state, &mut report).await?;
            self.retire_finished(state, &mut report);
            if !progressed {
                break;
            }
        }

        report.sweep = self.sweeper.sweep().await?;
        report.outbox_pending = state.outbox.len();

        if report.made_progress() || !report.sweep.is_quiet() {
            info!(
                iterations = report.iterations,
                progressed = report.events_progressed,
                retired = report.events_retired,
                submitted = report.tasks_submitted,
                requeued = report.tasks_requeued,
                pending_events = state.events.len(),
                "🔄 Trigger cycle completed"
            );
        }
        Ok(report)
    }

    /// One pass over the events registered when the pass starts. Spawned
    /// events are registered as soon as their parent emits them, so they
    /// survive a store failure later in the pass, and first advance in the
    /// next pass.
    async fn advance_all(
        &self,
        state: &mut OrchestratorState,
        report: &mut TriggerReport,
    ) -> Result<bool> {
        let mut progressed = false;

        let registered_at_start = state.events.len();
        for index in 0..registered_at_start {
            let registered = &mut state.events[index];
            let id = registered.id;
            if !registered.event.is_pending() {
                continue;
            }
            report.events_advanced += 1;

            let outcome = registered.event.advance().await;
            match outcome {
                Ok(advance) => {
                    if advance.progressed {
                        progressed = true;
                        report.events_progressed += 1;
                        debug!(event_id = %id, "event advanced");
                    }
                    let Emission {
                        submissions,
                        events,
                    } = advance.emission;
                    for event in events {
                        Self::register(state, event).await;
                        report.events_registered += 1;
                    }
                    self.stage(state, submissions);
                    self.flush_outbox(state, report).await?;
                }
                Err(e) if e.is_backend_unavailable() => return Err(e),
                Err(e) => {
                    report.events_failed += 1;
                    log_event_operation(
                        "advance",
                        &id.to_string(),
                        "failed",
                        Some(&e.to_string()),
                    );
                }
            }
        }
        Ok(progressed)
    }

    fn retire_finished(&self, state: &mut OrchestratorState, report: &mut TriggerReport) {
        state.events.retain(|registered| {
            let pending = registered.event.is_pending();
            if !pending {
                report.events_retired += 1;
                log_event_operation("retire", &registered.id.to_string(), "finished", None);
            }
            pending
        });
    }

    fn stage(&self, state: &mut OrchestratorState, submissions: Vec<Submission>) {
        let resource = self.resource();
        for submission in submissions {
            match submission.into_task(resource.as_deref()) {
                Ok(task) => state.outbox.push_back(PendingTask { task, rejections: 0 }),
                Err(e) => error!(error = %e, "dropping submission that cannot become a task"),
            }
        }
    }

    async fn flush_outbox(
        &self,
        state: &mut OrchestratorState,
        report: &mut TriggerReport,
    ) -> Result<()> {
        let mut rejected = Vec::new();
        while let Some(task) = state.outbox.front().map(|pending| pending.task.clone()) {
            let outcome = self.commit(task).await;
            if let Err(e) = &outcome {
                if e.is_backend_unavailable() {
                    for pending in rejected.into_iter().rev() {
                        state.outbox.push_front(pending);
                    }
                    warn!(pending = state.outbox.len(), "store unavailable, tasks kept in outbox");
                    return outcome.map(|_| ());
                }
            }

            let Some(mut pending) = state.outbox.pop_front() else {
                break;
            };
            match outcome {
                Ok(task) => {
                    debug!(task_id = %task.id, kind = %task.kind(), "task queued");
                    report.tasks_submitted += 1;
                }
                Err(e) => {
                    pending.rejections += 1;
                    if pending.rejections >= MAX_COMMIT_ATTEMPTS {
                        error!(
                            task_id = %pending.task.id,
                            attempts = pending.rejections,
                            error = %e,
                            "dropping task that the store keeps rejecting"
                        );
                        report.tasks_dropped += 1;
                    } else {
                        warn!(
                            task_id = %pending.task.id,
                            attempts = pending.rejections,
                            error = %e,
                            "task commit rejected, kept for retry"
                        );
                        rejected.push(pending);
                    }
                }
            }
        }
        state.outbox.extend(rejected);
        Ok(())
    }

    /// Insert `task` (if not already stored) and move it to `queued`.
    /// Safe to repeat after a partial failure.
    async fn commit(&self, task: Task) -> Result<Task> {
        let id = task.id;
        match self.tasks.tasks().add(task).await {
            Ok(_) => {}
            Err(e) if e.is_duplicate_key() => debug!(task_id = %id, "task already stored"),
            Err(e) => return Err(e),
        }
        match self.tasks.transition(id, TaskEvent::Enqueue).await {
            Ok(task) => Ok(task),
            Err(AdaptiveError::InvalidTransition { .. }) => self.tasks.tasks().refresh(id).await,
            Err(e) => Err(e),
        }
    }

    /// Tasks reset to `created` by the sweep still name their former owner
    async fn requeue_reclaimed(&self) -> Result<usize> {
        let created = self
            .tasks
            .tasks()
            .find(&Query::eq(fields::STATE, TaskState::Created.to_string()))
            .await?;

        let mut requeued = 0;
        for task in created {
            let Some(owner) = task.worker else { continue };
            let guard = Precondition::new().equals(fields::WORKER, owner);
            match self
                .tasks
                .transition_guarded(task.id, TaskEvent::Enqueue, &guard)
                .await
            {
                Ok(Updated::Applied(_)) => requeued += 1,
                Ok(Updated::Conflict(_)) | Err(AdaptiveError::InvalidTransition { .. }) => {}
                Err(e) if e.is_backend_unavailable() => return Err(e),
                Err(e) => warn!(task_id = %task.id, error = %e, "failed to requeue task"),
            }
        }
        Ok(requeued)
    }
}
