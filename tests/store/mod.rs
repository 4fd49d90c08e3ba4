//! PostgreSQL adapter tests. Run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use crate::common::simulate_task;
use adaptive_core::store::{
    Document, EntityStore, Patch, PgStore, Precondition, Query, StoreError,
};
use adaptive_core::constants::env;
use adaptive_core::{AdaptiveConfig, Project, TaskState};
use std::sync::Arc;

async fn connect() -> PgStore {
    let url = std::env::var(env::DATABASE_URL).expect("DATABASE_URL must be set for postgres tests");
    PgStore::connect(&url, 4).await.expect("connect to postgres")
}

fn unique(name: &str) -> String {
    format!("{name}_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_insert_find_and_cas_update() {
    let store = connect().await;
    let collection = unique("pgtest.tasks");
    store.create_collection(&collection, "tasks").await.unwrap();
    store.create_index(&collection, "state").await.unwrap();

    let task = simulate_task("pg");
    let id = task.id;
    let stored = store
        .insert(&collection, vec![Document::encode(id, &task).unwrap()])
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    let duplicate = store
        .insert(&collection, vec![Document::encode(id, &task).unwrap()])
        .await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateKey { .. })));

    let created = store
        .find(&collection, &Query::eq("state", "created"))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);

    let guard = Precondition::new().equals("state", "queued");
    let outcome = store
        .update(&collection, id, &Patch::new().set("state", "running"), Some(&guard))
        .await
        .unwrap();
    assert!(!outcome.is_applied());

    let guard = Precondition::new()
        .equals("state", "created")
        .equals("worker", serde_json::Value::Null);
    let outcome = store
        .update(&collection, id, &Patch::new().set("state", "queued"), Some(&guard))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(store.count(&collection, None).await.unwrap(), 1);

    store.drop_collection(&collection).await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_project_queue_round_trip() {
    let store: Arc<dyn EntityStore> = Arc::new(connect().await);
    let name = unique("pgproject");
    let project = Project::open_with(
        AdaptiveConfig::for_project(name.clone()),
        store.clone(),
        adaptive_core::orchestration::system_clock(),
    )
    .await
    .unwrap();

    let task = project.queue(vec![simulate_task("pg")]).await.unwrap().remove(0);
    let fetched = project.tasks().refresh(task.id).await.unwrap();
    assert_eq!(fetched.state, TaskState::Queued);
    assert_eq!(fetched.descriptor, task.descriptor);

    Project::delete_project(store.as_ref(), &name).await.unwrap();
}
