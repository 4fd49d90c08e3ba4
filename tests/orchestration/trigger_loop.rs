use crate::common::{simulate_task, Harness};
use adaptive_core::condition::from_fn;
use adaptive_core::config::AdaptiveConfig;
use adaptive_core::error::Result;
use adaptive_core::events::{action, Advance, Emission, Event};
use adaptive_core::state_machine::TaskState;
use adaptive_core::Workflow;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Finishes on its first advance, spawning its own successor
struct SelfFeeding {
    advanced: Arc<AtomicUsize>,
    done: bool,
}

impl SelfFeeding {
    fn new(advanced: Arc<AtomicUsize>) -> Self {
        Self {
            advanced,
            done: false,
        }
    }
}

#[async_trait]
impl Event for SelfFeeding {
    fn is_pending(&self) -> bool {
        !self.done
    }

    async fn advance(&mut self) -> Result<Advance> {
        if self.done {
            return Ok(Advance::idle());
        }
        self.done = true;
        self.advanced.fetch_add(1, Ordering::SeqCst);
        Ok(Advance::progressed(Emission::spawn(SelfFeeding::new(
            self.advanced.clone(),
        ))))
    }

    async fn describe(&self) -> String {
        "self-feeding chain link".to_string()
    }
}

#[tokio::test]
async fn test_add_event_with_satisfied_condition_emits_and_retires() {
    let harness = Harness::new("satisfied").await;
    let project = &harness.project;

    let plan = Workflow::new("already-true")
        .wait_for(project.on_ntraj(0))
        .submit(vec![simulate_task("a"), simulate_task("b")])
        .build();
    let handles = project.add_event(plan).await.unwrap();

    assert_eq!(handles.len(), 1);
    assert!(project.events_done().await);
    let states = project.task_states(false).await.unwrap();
    assert_eq!(states.get(&TaskState::Queued), Some(&2));
}

#[tokio::test]
async fn test_event_waits_until_condition_holds() {
    let harness = Harness::new("waiting").await;
    let project = &harness.project;

    let plan = Workflow::new("after-two")
        .wait_for(project.on_ntraj(2))
        .submit(vec![simulate_task("analysis")])
        .build();
    project.add_event(plan).await.unwrap();
    assert!(!project.events_done().await);
    assert!(project.tasks().is_empty().await.unwrap());

    harness.produce_trajectories(2).await;
    let report = project.trigger().await.unwrap();
    assert_eq!(report.tasks_submitted, 1);
    assert_eq!(report.events_retired, 1);
    assert!(project.events_done().await);
}

#[tokio::test]
async fn test_chained_events_complete_in_one_trigger() {
    let harness = Harness::new("chain").await;
    let project = &harness.project;

    let second = Workflow::new("second")
        .submit(vec![simulate_task("second")])
        .build();
    let first = Workflow::new("first")
        .submit(vec![simulate_task("first")])
        .spawn(second)
        .build();

    project.add_event(first).await.unwrap();
    assert!(project.events_done().await);
    assert_eq!(project.tasks().len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_iteration_bound_stops_self_feeding_chain() {
    let mut config = AdaptiveConfig::for_project("bounded");
    config.orchestrator.max_trigger_iterations = 5;
    let harness = Harness::with_config(config).await;
    let orchestrator = harness.project.orchestrator();

    let advanced = Arc::new(AtomicUsize::new(0));
    orchestrator
        .add_event(Box::new(SelfFeeding::new(advanced.clone())) as Box<dyn Event>)
        .await
        .unwrap();
    assert_eq!(advanced.load(Ordering::SeqCst), 5);
    assert_eq!(orchestrator.pending_events().await, 1);

    let report = orchestrator.trigger().await.unwrap();
    assert_eq!(report.iterations, 5);
    assert!(report.iteration_limit_hit);
    assert_eq!(advanced.load(Ordering::SeqCst), 10);
    assert_eq!(orchestrator.pending_events().await, 1);
}

#[tokio::test]
async fn test_failing_action_does_not_abort_cycle() {
    let harness = Harness::new("failing").await;
    let project = &harness.project;

    let broken = Workflow::new("broken")
        .run(action(|| Err(anyhow::anyhow!("input file missing"))))
        .build();
    let healthy = Workflow::new("healthy")
        .submit(vec![simulate_task("ok")])
        .build();

    let handles = project
        .add_event(vec![
            Box::new(broken) as Box<dyn Event>,
            Box::new(healthy) as Box<dyn Event>,
        ])
        .await
        .unwrap();
    assert_eq!(handles.len(), 2);

    let orchestrator = project.orchestrator();
    assert!(orchestrator.is_registered(handles[0].id).await);
    assert!(!orchestrator.is_registered(handles[1].id).await);
    assert_eq!(project.tasks().len().await.unwrap(), 1);

    let report = project.trigger().await.unwrap();
    assert_eq!(report.events_failed, 1);
    assert!(orchestrator.remove_event(handles[0].id).await);
    assert!(project.events_done().await);
}

#[tokio::test]
async fn test_outbox_retries_tasks_after_store_outage() {
    let mut config = AdaptiveConfig::for_project("outbox");
    config.orchestrator.requeue_reclaimed_tasks = false;
    let harness = Harness::with_config(config).await;
    let project = &harness.project;

    let store = harness.store.clone();
    let outage = from_fn("store goes away", move || {
        store.set_available(false);
        Ok(true)
    });
    let plan = Workflow::new("unlucky")
        .wait_for(outage)
        .submit(vec![simulate_task("kept")])
        .build();

    let err = project.add_event(plan).await.unwrap_err();
    assert!(err.is_backend_unavailable());
    assert_eq!(project.orchestrator().outbox_len().await, 1);

    harness.store.set_available(true);
    let report = project.trigger().await.unwrap();
    assert_eq!(report.tasks_submitted, 1);
    assert_eq!(report.outbox_pending, 0);
    assert!(project.events_done().await);

    let report = project.trigger().await.unwrap();
    assert_eq!(report.tasks_submitted, 0);
    let states = project.task_states(true).await.unwrap();
    assert_eq!(states.get(&TaskState::Queued), Some(&1));
    assert_eq!(states.values().sum::<usize>(), 1);
}

#[tokio::test]
async fn test_concurrent_triggers_are_serialized() {
    let harness = Harness::new("serialized").await;
    let project = &harness.project;

    let plan = Workflow::new("once")
        .submit(vec![simulate_task("only")])
        .build();
    project.orchestrator().add_event(plan).await.unwrap();

    let (a, b) = tokio::join!(project.trigger(), project.trigger());
    a.unwrap();
    b.unwrap();
    assert_eq!(project.tasks().len().await.unwrap(), 1);
}
