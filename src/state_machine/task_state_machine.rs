use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskState,
};
use crate::bundle::{Bundle, Updated};
use crate::constants::{defaults::MAX_CAS_ATTEMPTS, fields};
use crate::error::Result;
use crate::logging::log_task_transition;
use crate::models::Task;
use crate::orchestration::Clock;
use crate::store::{EntityId, Patch, Precondition};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Task lifecycle over the task bundle.
///
/// Every transition is a compare-and-set on the observed `state`, so two
/// processes racing on the same task resolve to one winner in the store.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    tasks: Bundle<Task>,
    clock: Arc<dyn Clock>,
}

impl TaskStateMachine {
    pub fn new(tasks: Bundle<Task>, clock: Arc<dyn Clock>) -> Self {
        Self { tasks, clock }
    }

    pub fn tasks(&self) -> &Bundle<Task> {
        &self.tasks
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Created, TaskEvent::Enqueue) => TaskState::Queued,
            (TaskState::Queued, TaskEvent::Claim { .. }) => TaskState::Running,
            (TaskState::Running, TaskEvent::Release) => TaskState::Queued,

            // Worker-reported terminal states
            (TaskState::Running, TaskEvent::Succeed) => TaskState::Success,
            (TaskState::Running, TaskEvent::Fail) => TaskState::Fail,
            (TaskState::Running, TaskEvent::Halt) => TaskState::Halt,

            // Cancellation before or during execution
            (TaskState::Created | TaskState::Queued | TaskState::Running, TaskEvent::Cancel) => {
                TaskState::Cancelled
            }

            // Owning worker found dead
            (TaskState::Queued | TaskState::Running, TaskEvent::Reclaim { to })
                if matches!(to, TaskState::Created | TaskState::Fail) =>
            {
                *to
            }

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    entity: "task",
                    from: from_state.to_string(),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn plan(
        &self,
        task: &Task,
        target: TaskState,
        event: &TaskEvent,
    ) -> Result<(Patch, Precondition)> {
        let mut patch = Patch::new()
            .set(fields::STATE, target.to_string())
            .set(
                fields::STATE_CHANGED_AT,
                serde_json::to_value(self.clock.now())?,
            );
        let mut precondition = Precondition::new().equals(fields::STATE, task.state.to_string());

        match event {
            TaskEvent::Enqueue | TaskEvent::Release => {
                patch = patch.set(fields::WORKER, Value::Null);
            }
            TaskEvent::Claim { worker } => {
                patch = patch.set(fields::WORKER, *worker);
                precondition = precondition.equals(fields::WORKER, Value::Null);
            }
            _ => {}
        }
        Ok((patch, precondition))
    }

    /// Apply `event` to task `id`, requiring `guard` to hold as well.
    ///
    /// A concurrent state change is retried against the new state; a failed
    /// guard (or a lost claim) with the state unchanged yields
    /// [`Updated::Conflict`] with the current task.
    pub async fn transition_guarded(
        &self,
        id: EntityId,
        event: TaskEvent,
        guard: &Precondition,
    ) -> Result<Updated<Task>> {
        let mut task = self.tasks.refresh(id).await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let target = Self::determine_target_state(task.state, &event)?;
            let (patch, precondition) = self.plan(&task, target, &event)?;
            let precondition = precondition.merge(guard);

            match self.tasks.update(id, &patch, Some(&precondition)).await? {
                Updated::Applied(updated) => {
                    log_task_transition(id, task.state, target, event.event_type());
                    return Ok(Updated::Applied(updated));
                }
                Updated::Conflict(current) => {
                    debug!(
                        task_id = %id,
                        attempt,
                        observed = %task.state,
                        current = %current.state,
                        event = event.event_type(),
                        "task transition lost a race"
                    );
                    let claim = matches!(event, TaskEvent::Claim { .. });
                    if claim || current.state == task.state {
                        return Ok(Updated::Conflict(current));
                    }
                    task = current;
                }
            }
        }

        Err(StateMachineError::Contention {
            entity: "task",
            id,
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    /// Apply `event` to task `id`
    pub async fn transition(&self, id: EntityId, event: TaskEvent) -> Result<Task> {
        match self
            .transition_guarded(id, event.clone(), &Precondition::new())
            .await?
        {
            Updated::Applied(task) => Ok(task),
            Updated::Conflict(current) => Err(match event {
                TaskEvent::Claim { .. } => StateMachineError::ClaimRejected {
                    task: id,
                    reason: match current.worker {
                        Some(owner) => format!("task is {} and owned by {owner}", current.state),
                        None => format!("task is {}", current.state),
                    },
                },
                _ => StateMachineError::Contention {
                    entity: "task",
                    id,
                    attempts: 1,
                },
            }
            .into()),
        }
    }

    pub async fn current_state(&self, id: EntityId) -> Result<TaskState> {
        Ok(self.tasks.refresh(id).await?.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdaptiveError;
    use crate::orchestration::SystemClock;
    use serde_json::json;

    #[test]
    fn test_state_transitions() {
        use TaskState::*;
        let cases = [
            (Created, TaskEvent::Enqueue, Queued),
            (Queued, TaskEvent::Claim { worker: EntityId::new() }, Running),
            (Running, TaskEvent::Release, Queued),
            (Running, TaskEvent::Succeed, Success),
            (Running, TaskEvent::Fail, Fail),
            (Running, TaskEvent::Halt, Halt),
            (Running, TaskEvent::Cancel, Cancelled),
            (Queued, TaskEvent::Cancel, Cancelled),
            (Created, TaskEvent::Cancel, Cancelled),
            (Running, TaskEvent::Reclaim { to: Created }, Created),
            (Queued, TaskEvent::Reclaim { to: Fail }, Fail),
        ];
        for (from, event, to) in cases {
            assert_eq!(
                TaskStateMachine::determine_target_state(from, &event).unwrap(),
                to,
                "{from} --{}--> {to}",
                event.event_type()
            );
        }
    }

    #[test]
    fn test_invalid_transitions() {
        use TaskState::*;
        assert!(TaskStateMachine::determine_target_state(Created, &TaskEvent::Succeed).is_err());
        assert!(TaskStateMachine::determine_target_state(Queued, &TaskEvent::Enqueue).is_err());
        assert!(TaskStateMachine::determine_target_state(Queued, &TaskEvent::Release).is_err());
        assert!(TaskStateMachine::determine_target_state(
            Running,
            &TaskEvent::Reclaim { to: Queued }
        )
        .is_err());
        assert!(TaskStateMachine::determine_target_state(
            Created,
            &TaskEvent::Reclaim { to: Created }
        )
        .is_err());
        for terminal in [Success, Fail, Halt, Cancelled] {
            for event in [
                TaskEvent::Enqueue,
                TaskEvent::Claim { worker: EntityId::new() },
                TaskEvent::Release,
                TaskEvent::Succeed,
                TaskEvent::Cancel,
                TaskEvent::Reclaim { to: Created },
            ] {
                assert!(TaskStateMachine::determine_target_state(terminal, &event).is_err());
            }
        }
    }

    async fn machine_with_task() -> (TaskStateMachine, Task) {
        let tasks = Bundle::<Task>::in_memory();
        let task = tasks.add(Task::new("md", json!({}))).await.unwrap();
        (TaskStateMachine::new(tasks, Arc::new(SystemClock)), task)
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (machine, task) = machine_with_task().await;
        machine.transition(task.id, TaskEvent::Enqueue).await.unwrap();

        let (a, b) = (EntityId::new(), EntityId::new());
        let won = machine
            .transition(task.id, TaskEvent::Claim { worker: a })
            .await
            .unwrap();
        assert_eq!(won.state, TaskState::Running);
        assert_eq!(won.worker, Some(a));
        assert!(won.state_changed_at.is_some());

        let lost = machine
            .transition(task.id, TaskEvent::Claim { worker: b })
            .await
            .unwrap_err();
        assert!(matches!(lost, AdaptiveError::InvalidTransition { .. }));
        assert_eq!(machine.tasks().get(task.id).await.unwrap().worker, Some(a));
    }

    #[tokio::test]
    async fn test_guard_conflict_keeps_state() {
        let (machine, task) = machine_with_task().await;
        machine.transition(task.id, TaskEvent::Enqueue).await.unwrap();
        let owner = EntityId::new();
        machine
            .transition(task.id, TaskEvent::Claim { worker: owner })
            .await
            .unwrap();

        let guard = Precondition::new().equals(fields::WORKER, EntityId::new());
        let outcome = machine
            .transition_guarded(task.id, TaskEvent::Succeed, &guard)
            .await
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(outcome.entity().state, TaskState::Running);

        let guard = Precondition::new().equals(fields::WORKER, owner);
        let outcome = machine
            .transition_guarded(task.id, TaskEvent::Succeed, &guard)
            .await
            .unwrap();
        assert_eq!(outcome.into_inner().state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_terminal_transition_rejected_without_change() {
        let (machine, task) = machine_with_task().await;
        machine.transition(task.id, TaskEvent::Cancel).await.unwrap();
        let err = machine
            .transition(task.id, TaskEvent::Enqueue)
            .await
            .unwrap_err();
        assert!(matches!(err, AdaptiveError::InvalidTransition { .. }));
        assert_eq!(
            machine.current_state(task.id).await.unwrap(),
            TaskState::Cancelled
        );
    }
}
