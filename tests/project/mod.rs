use crate::common::{simulate_task, Harness};
use adaptive_core::condition::Condition;
use adaptive_core::models::{ConfigurationSelector, FrameRef, ResourceConfiguration, Trajectory};
use adaptive_core::state_machine::TaskState;
use adaptive_core::store::{EntityStore, InMemoryStore, Patch};
use adaptive_core::{AdaptiveConfig, AdaptiveError, Project};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_ntrajectories_condition_tracks_existing_files() {
    let harness = Harness::new("ntraj").await;
    let project = &harness.project;
    harness.produce_trajectories(3).await;

    // requested but not produced: invisible to the condition
    let pending = project.new_trajectory(FrameRef::new("input.pdb", 0), 50, Some("openmm".into()), 1);
    project.all_trajectories().add_all(pending).await.unwrap();

    let five = project.on_ntraj(5);
    assert!(!five.check().await.unwrap());
    assert_eq!(five.describe().await, "#trajectories[3] >= 5");

    harness.produce_trajectories(2).await;
    assert!(five.check().await.unwrap());

    let seven = five.offset(2).unwrap();
    assert!(!seven.check().await.unwrap());
    assert!(five.check().await.unwrap());
}

#[tokio::test]
async fn test_queue_trajectories_uses_selected_resource() {
    let harness = Harness::new("resources").await;
    let project = &harness.project;
    project
        .configurations()
        .add_all(vec![
            ResourceConfiguration::new("local", "localhost", serde_json::json!({})),
            ResourceConfiguration::new("cluster", "gpu-cluster", serde_json::json!({ "cores": 64 })),
        ])
        .await
        .unwrap();

    let selected = project
        .select_configuration(ConfigurationSelector::Named("cluster".into()))
        .await
        .unwrap();
    assert!(selected.current);
    assert_eq!(project.current_configuration().unwrap().name, "cluster");

    let trajectories =
        project.new_trajectory(FrameRef::new("input.pdb", 0), 100, Some("openmm".into()), 2);
    let pinned = simulate_task("pinned").with_resource("localhost");
    let mut items: Vec<adaptive_core::models::Submission> =
        trajectories.into_iter().map(Into::into).collect();
    items.push(pinned.into());

    let tasks = project.queue(items).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|task| task.state == TaskState::Queued));
    assert_eq!(tasks[0].descriptor.resource.as_deref(), Some("gpu-cluster"));
    assert_eq!(tasks[1].descriptor.resource.as_deref(), Some("gpu-cluster"));
    assert_eq!(tasks[2].descriptor.resource.as_deref(), Some("localhost"));

    let current = project
        .select_configuration(ConfigurationSelector::Current)
        .await
        .unwrap();
    assert_eq!(current.name, "cluster");
}

#[tokio::test]
async fn test_configuration_selection_requires_single_match() {
    let harness = Harness::new("selection").await;
    let project = &harness.project;

    let none = project.select_configuration(ConfigurationSelector::Only).await;
    assert!(matches!(none, Err(AdaptiveError::ConfigurationSelection(_))));

    project
        .configurations()
        .add_all(vec![
            ResourceConfiguration::new("a", "host-a", serde_json::Value::Null),
            ResourceConfiguration::new("b", "host-b", serde_json::Value::Null),
        ])
        .await
        .unwrap();

    for selector in [
        ConfigurationSelector::Only,
        ConfigurationSelector::Current,
        ConfigurationSelector::Named("missing".into()),
    ] {
        let result = project.select_configuration(selector).await;
        assert!(matches!(result, Err(AdaptiveError::ConfigurationSelection(_))));
    }
    assert!(project.current_configuration().is_none());

    project
        .select_configuration(ConfigurationSelector::Named("a".into()))
        .await
        .unwrap();
    project
        .select_configuration(ConfigurationSelector::Named("b".into()))
        .await
        .unwrap();
    let flagged = project.configurations().matching("current", true).await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].name, "b");
}

#[tokio::test]
async fn test_trajectory_names_continue_after_reopen() {
    let store: Arc<dyn EntityStore> = Arc::new(InMemoryStore::new());
    let config = AdaptiveConfig::for_project("numbering");

    let first = Project::open_with(config.clone(), store.clone(), adaptive_core::orchestration::system_clock())
        .await
        .unwrap();
    let created = first.new_trajectory(FrameRef::new("input.pdb", 0), 10, None, 3);
    assert_eq!(
        created[0].location,
        "sandbox:///projects/numbering/trajs/00000000/"
    );
    first.all_trajectories().add_all(created).await.unwrap();
    first.close().await;

    let reopened = Project::open_with(config, store, adaptive_core::orchestration::system_clock())
        .await
        .unwrap();
    let next: Vec<Trajectory> = reopened.new_trajectory(FrameRef::new("input.pdb", 0), 10, None, 1);
    assert_eq!(next[0].number(), Some(3));
}

#[tokio::test]
async fn test_task_states_deep_check_sees_external_writes() {
    let harness = Harness::new("tally").await;
    let project = &harness.project;
    let tasks = project
        .queue(vec![simulate_task("a"), simulate_task("b"), simulate_task("c")])
        .await
        .unwrap();
    project.tasks().all().await.unwrap();

    // another process finishes a task behind this project's back
    harness
        .store
        .update(
            project.tasks().collection(),
            tasks[0].id,
            &Patch::new().set("state", "cancelled"),
            None,
        )
        .await
        .unwrap();

    let states = project.task_states(true).await.unwrap();
    assert_eq!(states.get(&TaskState::Queued), Some(&2));
    assert_eq!(states.get(&TaskState::Cancelled), Some(&1));
}

#[tokio::test]
async fn test_list_and_delete_projects() {
    let store: Arc<dyn EntityStore> = Arc::new(InMemoryStore::new());
    for name in ["alpha", "beta"] {
        Project::open_with(
            AdaptiveConfig::for_project(name),
            store.clone(),
            adaptive_core::orchestration::system_clock(),
        )
        .await
        .unwrap();
    }

    let projects = Project::list_projects(store.as_ref()).await.unwrap();
    assert_eq!(projects, vec!["alpha".to_string(), "beta".to_string()]);

    let dropped = Project::delete_project(store.as_ref(), "alpha").await.unwrap();
    assert_eq!(dropped, 6);
    assert_eq!(
        Project::list_projects(store.as_ref()).await.unwrap(),
        vec!["beta".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_polls_without_timeout() {
    let harness = Harness::new("waiting").await;
    let project = &harness.project;

    project.wait_until(&project.on_nmodel(0)).await.unwrap();

    let never = project.on_nmodel(1);
    let bounded = tokio::time::timeout(Duration::from_secs(60), project.wait_until(&never)).await;
    assert!(bounded.is_err(), "wait_until has no built-in timeout");
}

#[tokio::test(start_paused = true)]
async fn test_background_driver_advances_events() {
    let project = Project::open_in_memory("driven").await.unwrap();
    let plan = adaptive_core::Workflow::new("late")
        .wait_for(project.on_nmodel(1))
        .submit(vec![simulate_task("after-model")])
        .build();
    project.add_event(plan).await.unwrap();

    project.run().unwrap();
    project.run().unwrap();
    assert!(project.is_running());

    project
        .models()
        .add(adaptive_core::models::Model::new(serde_json::json!({ "msm": [] })))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(project.events_done().await);
    assert_eq!(project.tasks().len().await.unwrap(), 1);
    project.stop().await;
    assert!(!project.is_running());
}

#[test]
fn test_run_outside_runtime_is_an_error() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let project = runtime.block_on(Project::open_in_memory("offline")).unwrap();

    let err = project.run().unwrap_err();
    assert!(matches!(err, AdaptiveError::Runtime(_)));
    assert!(!project.is_running());

    runtime.block_on(async {
        project.run().unwrap();
        assert!(project.is_running());
        project.stop().await;
    });
}
