use adaptive_core::config::{ConfigManager, ConfigurationError, StoreBackend};
use adaptive_core::state_machine::DeadWorkerPolicy;
use adaptive_core::{CachePolicy, Project};
use std::collections::HashMap;
use std::io::Write;

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_yaml_configuration_drives_project() {
    let file = yaml_file(
        r#"
project: alanine
orchestrator:
  dead_time_seconds: 90
  dead_worker_policy: none
  max_trigger_iterations: 10
cache:
  tasks: none
  models:
    bounded: 16
"#,
    );
    let manager = ConfigManager::load_with_env(Some(file.path()), HashMap::new()).unwrap();
    let config = manager.config().clone();

    assert_eq!(config.project, "alanine");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.orchestrator.dead_worker_policy, DeadWorkerPolicy::None);
    assert_eq!(config.cache.tasks, CachePolicy::None);
    assert_eq!(config.cache.models, CachePolicy::Bounded(16));

    let project = Project::open(config).await.unwrap();
    assert_eq!(project.name(), "alanine");
    assert_eq!(project.tasks().caching(), CachePolicy::None);
    assert_eq!(project.models().caching(), CachePolicy::Bounded(16));
    assert_eq!(project.orchestrator().config().max_trigger_iterations, 10);
}

#[test]
fn test_postgres_backend_without_url_is_rejected() {
    let file = yaml_file("store:\n  backend: postgres\n");
    let result = ConfigManager::load_with_env(Some(file.path()), HashMap::new());
    assert!(matches!(
        result,
        Err(ConfigurationError::MissingRequiredField { .. })
    ));
}

#[test]
fn test_environment_variables_override_nested_keys() {
    let vars = HashMap::from([
        (
            "ADAPTIVE__ORCHESTRATOR__DEAD_WORKER_POLICY".to_string(),
            "fail".to_string(),
        ),
        (
            "ADAPTIVE__ORCHESTRATOR__TRIGGER_INTERVAL_SECONDS".to_string(),
            "2".to_string(),
        ),
    ]);
    let manager = ConfigManager::load_with_env(None, vars).unwrap();
    let orchestrator = &manager.config().orchestrator;
    assert_eq!(orchestrator.dead_worker_policy, DeadWorkerPolicy::Fail);
    assert_eq!(orchestrator.trigger_interval_seconds, 2);
    assert!(manager.source().is_none());
}
