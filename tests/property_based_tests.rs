//! Property-based tests for the scheduler invariants

mod common;

use adaptive_core::bundle::BoundedCache;
use adaptive_core::config::AdaptiveConfig;
use adaptive_core::error::Result;
use adaptive_core::events::{Advance, Emission, Event};
use adaptive_core::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use adaptive_core::store::EntityId;
use adaptive_core::{AdaptiveError, WorkerAgent};
use async_trait::async_trait;
use chrono::Duration;
use common::{simulate_task, Harness};
use proptest::prelude::*;

fn task_state_strategy() -> impl Strategy<Value = TaskState> {
    prop::sample::select(TaskState::ALL.to_vec())
}

fn task_event_strategy() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        Just(TaskEvent::Enqueue),
        Just(TaskEvent::Claim {
            worker: EntityId::new()
        }),
        Just(TaskEvent::Release),
        Just(TaskEvent::Succeed),
        Just(TaskEvent::Fail),
        Just(TaskEvent::Halt),
        Just(TaskEvent::Cancel),
        task_state_strategy().prop_map(|to| TaskEvent::Reclaim { to }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Spawns a successor on every advance until `links` run out
struct Chain {
    links: usize,
    done: bool,
}

#[async_trait]
impl Event for Chain {
    fn is_pending(&self) -> bool {
        !self.done
    }

    async fn advance(&mut self) -> Result<Advance> {
        if self.done {
            return Ok(Advance::idle());
        }
        self.done = true;
        let emission = if self.links > 0 {
            Emission::spawn(Chain {
                links: self.links - 1,
                done: false,
            })
        } else {
            Emission::none()
        };
        Ok(Advance::progressed(emission))
    }

    async fn describe(&self) -> String {
        format!("chain with {} links left", self.links)
    }
}

#[derive(Debug, Clone)]
enum CacheOp {
    Insert(u8),
    Get(u8),
    Remove(u8),
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (0u8..12).prop_map(CacheOp::Insert),
        (0u8..12).prop_map(CacheOp::Get),
        (0u8..12).prop_map(CacheOp::Remove),
    ]
}

#[derive(Debug, Clone)]
enum WorkerOp {
    Claim(usize),
    Heartbeat(usize),
    Finish(usize),
    Advance(i64),
    Trigger,
}

fn worker_op_strategy(workers: usize) -> impl Strategy<Value = WorkerOp> {
    prop_oneof![
        (0..workers).prop_map(WorkerOp::Claim),
        (0..workers).prop_map(WorkerOp::Heartbeat),
        (0..workers).prop_map(WorkerOp::Finish),
        (1i64..90).prop_map(WorkerOp::Advance),
        Just(WorkerOp::Trigger),
    ]
}

proptest! {
    /// Property: no event moves a task out of a terminal state
    #[test]
    fn terminal_task_states_are_absorbing(
        state in task_state_strategy(),
        event in task_event_strategy(),
    ) {
        let result = TaskStateMachine::determine_target_state(state, &event);
        if state.is_terminal() {
            prop_assert!(result.is_err(), "{state} accepted {}", event.event_type());
        }
    }

    /// Property: any event sequence only ever visits states the table allows
    #[test]
    fn task_walks_stay_closed(events in prop::collection::vec(task_event_strategy(), 0..30)) {
        let mut state = TaskState::Created;
        let mut terminal_seen = false;
        for event in &events {
            if let Ok(next) = TaskStateMachine::determine_target_state(state, event) {
                prop_assert!(!terminal_seen, "left terminal state {state}");
                state = next;
                terminal_seen = state.is_terminal();
            }
        }
    }

    /// Property: the LRU never exceeds capacity and evicts least recently used first
    #[test]
    fn bounded_cache_matches_lru_model(
        capacity in 1usize..6,
        ops in prop::collection::vec(cache_op_strategy(), 0..60),
    ) {
        let keys: Vec<EntityId> = (0..12).map(|_| EntityId::new()).collect();
        let mut cache = BoundedCache::new(capacity);
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                CacheOp::Insert(k) => {
                    model.retain(|m| *m != k);
                    model.push(k);
                    let mut expected = Vec::new();
                    while model.len() > capacity {
                        expected.push(keys[usize::from(model.remove(0))]);
                    }
                    prop_assert_eq!(cache.insert(keys[usize::from(k)], k), expected);
                }
                CacheOp::Get(k) => {
                    let hit = cache.get(&keys[usize::from(k)]);
                    if let Some(pos) = model.iter().position(|m| *m == k) {
                        model.remove(pos);
                        model.push(k);
                        prop_assert_eq!(hit, Some(k));
                    } else {
                        prop_assert_eq!(hit, None);
                    }
                }
                CacheOp::Remove(k) => {
                    model.retain(|m| *m != k);
                    cache.remove(&keys[usize::from(k)]);
                }
            }
            prop_assert!(cache.len() <= capacity);
            let order: Vec<EntityId> = model.iter().map(|k| keys[usize::from(*k)]).collect();
            prop_assert_eq!(cache.ids_by_recency(), order);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: one trigger never runs more passes than its bound
    #[test]
    fn trigger_respects_iteration_bound(
        bound in 1usize..12,
        chains in prop::collection::vec(0usize..30, 1..4),
    ) {
        runtime().block_on(async {
            let mut config = AdaptiveConfig::for_project("bound");
            config.orchestrator.max_trigger_iterations = bound;
            let harness = Harness::with_config(config).await;
            let orchestrator = harness.project.orchestrator();

            let events: Vec<Box<dyn Event>> = chains
                .iter()
                .map(|links| Box::new(Chain { links: *links, done: false }) as Box<dyn Event>)
                .collect();
            orchestrator.add_event(events).await.unwrap();

            let longest = chains.iter().copied().max().unwrap_or(0);
            let mut triggers = 0;
            while !orchestrator.events_done().await {
                let report = orchestrator.trigger().await.unwrap();
                assert!(report.iterations <= bound);
                triggers += 1;
                assert!(triggers <= longest + 1, "chains must drain");
            }
        });
    }

    /// Property: under any interleaving of claims, heartbeats, clock jumps
    /// and sweeps, at most one live worker holds the task and a running task
    /// always names its holder
    #[test]
    fn no_double_ownership(ops in prop::collection::vec(worker_op_strategy(3), 1..40)) {
        runtime().block_on(async {
            let harness = Harness::new("ownership").await;
            let mut agents: Vec<WorkerAgent> = Vec::new();
            for host in ["a", "b", "c"] {
                agents.push(harness.agent(host).await);
            }
            let task = harness
                .project
                .queue(vec![simulate_task("contested")])
                .await
                .unwrap()
                .remove(0);

            for op in ops {
                match op {
                    WorkerOp::Claim(i) => {
                        let (first, second) = tokio::join!(
                            agents[i].claim(task.id),
                            agents[(i + 1) % agents.len()].claim(task.id)
                        );
                        assert!(!(first.is_ok() && second.is_ok()));
                    }
                    WorkerOp::Heartbeat(i) => {
                        let _ = agents[i].heartbeat().await;
                    }
                    WorkerOp::Finish(i) => {
                        match agents[i].report(task.id, TaskState::Success).await {
                            Ok(_)
                            | Err(AdaptiveError::ClaimRejected { .. })
                            | Err(AdaptiveError::InvalidTransition { .. }) => {}
                            Err(e) => panic!("unexpected report failure: {e}"),
                        }
                    }
                    WorkerOp::Advance(seconds) => harness.clock.advance(Duration::seconds(seconds)),
                    WorkerOp::Trigger => {
                        harness.project.trigger().await.unwrap();
                    }
                }

                let stored = harness.project.tasks().refresh(task.id).await.unwrap();
                let mut holders = 0;
                for agent in &agents {
                    let record = agent.record().await.unwrap();
                    if record.is_alive() && record.current == Some(task.id) {
                        holders += 1;
                        assert_eq!(stored.worker, Some(record.id));
                    }
                }
                assert!(holders <= 1, "task held by {holders} live workers");
                if stored.state == TaskState::Running {
                    assert!(stored.worker.is_some());
                }
            }
        });
    }
}
