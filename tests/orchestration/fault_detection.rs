use crate::common::{simulate_task, Harness};
use adaptive_core::config::AdaptiveConfig;
use adaptive_core::models::WorkerCommand;
use adaptive_core::state_machine::{DeadWorkerPolicy, TaskState, WorkerState};
use adaptive_core::AdaptiveError;
use chrono::Duration;

#[tokio::test]
async fn test_dead_worker_reassignment() {
    let harness = Harness::new("dead_worker").await;
    let project = &harness.project;

    let worker = harness.agent("node-7").await;
    let task = project.queue(vec![simulate_task("md")]).await.unwrap().remove(0);
    worker.claim(task.id).await.unwrap();

    harness.clock.advance(Duration::seconds(61));
    let report = project.trigger().await.unwrap();
    assert_eq!(report.sweep.workers_killed, vec![worker.id()]);

    let dead = worker.record().await.unwrap();
    assert_eq!(dead.state, WorkerState::Dead);
    assert_eq!(dead.command, Some(WorkerCommand::Kill));
    assert_eq!(dead.current, None);

    let reclaimed = project.tasks().refresh(task.id).await.unwrap();
    assert_eq!(reclaimed.state, TaskState::Created);
    assert_eq!(reclaimed.worker, Some(worker.id()));

    // the next cycle puts the task back in the queue for another worker
    let report = project.trigger().await.unwrap();
    assert_eq!(report.tasks_requeued, 1);
    assert!(report.sweep.tasks_reclaimed.is_empty());
    let requeued = project.tasks().refresh(task.id).await.unwrap();
    assert_eq!(requeued.state, TaskState::Queued);
    assert_eq!(requeued.worker, None);

    let replacement = harness.agent("node-8").await;
    let claimed = replacement.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
}

#[tokio::test]
async fn test_heartbeat_keeps_worker_alive() {
    let harness = Harness::new("heartbeat").await;
    let worker = harness.agent("node-1").await;

    for _ in 0..4 {
        harness.clock.advance(Duration::seconds(45));
        worker.heartbeat().await.unwrap();
        let report = harness.project.trigger().await.unwrap();
        assert!(report.sweep.workers_killed.is_empty());
    }
    assert_eq!(worker.record().await.unwrap().state, WorkerState::Idle);
}

#[tokio::test]
async fn test_dead_worker_tasks_transition_once() {
    let mut config = AdaptiveConfig::for_project("fail_policy");
    config.orchestrator.dead_worker_policy = DeadWorkerPolicy::Fail;
    let harness = Harness::with_config(config).await;
    let project = &harness.project;

    let worker = harness.agent("node-1").await;
    let task = project.queue(vec![simulate_task("md")]).await.unwrap().remove(0);
    worker.claim(task.id).await.unwrap();
    harness.clock.advance(Duration::seconds(300));

    let first = project.trigger().await.unwrap();
    assert_eq!(first.sweep.tasks_reclaimed, vec![task.id]);

    for _ in 0..3 {
        harness.clock.advance(Duration::seconds(300));
        let again = project.trigger().await.unwrap();
        assert!(again.sweep.is_quiet());
    }

    let failed = project.tasks().refresh(task.id).await.unwrap();
    assert_eq!(failed.state, TaskState::Fail);
    assert_eq!(project.logs().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_killed_worker_acknowledges_and_cannot_claim() {
    let harness = Harness::new("acknowledge").await;
    let project = &harness.project;
    let worker = harness.agent("node-1").await;
    let task = project.queue(vec![simulate_task("md")]).await.unwrap().remove(0);

    harness.clock.advance(Duration::seconds(61));
    project.trigger().await.unwrap();

    assert_eq!(worker.poll_command().await.unwrap(), Some(WorkerCommand::Kill));
    assert!(matches!(
        worker.claim(task.id).await,
        Err(AdaptiveError::ClaimRejected { .. })
    ));
    assert!(worker.heartbeat().await.is_err());
    assert_eq!(worker.shutdown().await.unwrap().state, WorkerState::Down);
}

#[tokio::test]
async fn test_concurrent_claim_race_has_one_winner() {
    let harness = Harness::new("claim_race").await;
    let project = &harness.project;
    let first = harness.agent("node-1").await;
    let second = harness.agent("node-2").await;
    let task = project.queue(vec![simulate_task("md")]).await.unwrap().remove(0);

    let (a, b) = tokio::join!(first.claim(task.id), second.claim(task.id));
    assert!(a.is_ok() != b.is_ok(), "exactly one claim must win");

    let (winner, loser, rejected) = if a.is_ok() {
        (&first, &second, b)
    } else {
        (&second, &first, a)
    };
    assert!(matches!(rejected, Err(AdaptiveError::ClaimRejected { .. })));

    let stored = project.tasks().refresh(task.id).await.unwrap();
    assert_eq!(stored.state, TaskState::Running);
    assert_eq!(stored.worker, Some(winner.id()));
    assert_eq!(winner.record().await.unwrap().current, Some(task.id));

    let loser = loser.record().await.unwrap();
    assert_eq!(loser.current, None);
    assert_eq!(loser.state, WorkerState::Idle);
}

#[tokio::test]
async fn test_store_outage_propagates_from_trigger() {
    let harness = Harness::new("outage").await;
    harness.agent("node-1").await;
    harness.store.set_available(false);

    let err = harness.project.trigger().await.unwrap_err();
    assert!(err.is_backend_unavailable());

    harness.store.set_available(true);
    assert!(harness.project.trigger().await.is_ok());
}
