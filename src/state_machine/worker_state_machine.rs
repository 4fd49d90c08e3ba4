use super::{
    errors::{StateMachineError, StateMachineResult},
    events::WorkerEvent,
    states::WorkerState,
};
use crate::bundle::{Bundle, Updated};
use crate::constants::{defaults::MAX_CAS_ATTEMPTS, fields};
use crate::error::Result;
use crate::logging::log_worker_operation;
use crate::models::{Worker, WorkerCommand};
use crate::store::{EntityId, Patch, Precondition};
use serde_json::Value;
use tracing::debug;

/// Worker lifecycle over the worker bundle
#[derive(Debug, Clone)]
pub struct WorkerStateMachine {
    workers: Bundle<Worker>,
}

impl WorkerStateMachine {
    pub fn new(workers: Bundle<Worker>) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> &Bundle<Worker> {
        &self.workers
    }

    pub fn determine_target_state(
        current_state: WorkerState,
        event: &WorkerEvent,
    ) -> StateMachineResult<WorkerState> {
        let target = match (current_state, event) {
            (WorkerState::Registered, WorkerEvent::Activate) => WorkerState::Idle,
            (WorkerState::Registered | WorkerState::Idle, WorkerEvent::StartTask { .. }) => {
                WorkerState::Running
            }
            (WorkerState::Running, WorkerEvent::FinishTask) => WorkerState::Idle,

            // A dead worker acknowledging its kill also ends up down
            (from, WorkerEvent::Shutdown) if from.is_alive() || from == WorkerState::Dead => {
                WorkerState::Down
            }
            (from, WorkerEvent::Kill) if from.is_alive() => WorkerState::Dead,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    entity: "worker",
                    from: from_state.to_string(),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn plan(worker: &Worker, target: WorkerState, event: &WorkerEvent) -> (Patch, Precondition) {
        let mut patch = Patch::new().set(fields::STATE, target.to_string());
        match event {
            WorkerEvent::StartTask { task } => {
                patch = patch.set(fields::CURRENT, *task);
            }
            WorkerEvent::FinishTask | WorkerEvent::Shutdown => {
                patch = patch.set(fields::CURRENT, Value::Null);
            }
            WorkerEvent::Kill => {
                patch = patch
                    .set(fields::COMMAND, WorkerCommand::Kill.to_string())
                    .set(fields::CURRENT, Value::Null);
            }
            WorkerEvent::Activate => {}
        }
        let precondition = Precondition::new().equals(fields::STATE, worker.state.to_string());
        (patch, precondition)
    }

    /// Apply `event` to worker `id` with an extra `guard`; see
    /// [`TaskStateMachine::transition_guarded`](super::TaskStateMachine::transition_guarded)
    pub async fn transition_guarded(
        &self,
        id: EntityId,
        event: WorkerEvent,
        guard: &Precondition,
    ) -> Result<Updated<Worker>> {
        let mut worker = self.workers.refresh(id).await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let target = Self::determine_target_state(worker.state, &event)?;
            let (patch, precondition) = Self::plan(&worker, target, &event);
            let precondition = precondition.merge(guard);

            match self.workers.update(id, &patch, Some(&precondition)).await? {
                Updated::Applied(updated) => {
                    log_worker_operation(event.event_type(), id, target, None);
                    return Ok(Updated::Applied(updated));
                }
                Updated::Conflict(current) => {
                    debug!(
                        worker_id = %id,
                        attempt,
                        observed = %worker.state,
                        current = %current.state,
                        event = event.event_type(),
                        "worker transition lost a race"
                    );
                    if current.state == worker.state {
                        return Ok(Updated::Conflict(current));
                    }
                    worker = current;
                }
            }
        }

        Err(StateMachineError::Contention {
            entity: "worker",
            id,
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    pub async fn transition(&self, id: EntityId, event: WorkerEvent) -> Result<Worker> {
        match self
            .transition_guarded(id, event, &Precondition::new())
            .await?
        {
            Updated::Applied(worker) => Ok(worker),
            Updated::Conflict(_) => Err(StateMachineError::Contention {
                entity: "worker",
                id,
                attempts: 1,
            }
            .into()),
        }
    }
}
