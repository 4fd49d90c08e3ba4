//! # Project
//!
//! Entry point for workflow authors. A project owns one store handle, the
//! named bundles every process of the project shares, and the orchestrator
//! that advances its events.
//!
//! Collections are named `<prefix><project>.<kind>`, so several projects can
//! live in one store and be listed or deleted by name.
//!
//! ```rust,no_run
//! use adaptive_core::{AdaptiveConfig, Project, Workflow};
//! use adaptive_core::models::FrameRef;
//!
//! # async fn example() -> adaptive_core::Result<()> {
//! let project = Project::open(AdaptiveConfig::for_project("villin")).await?;
//! let seeds = project.new_trajectory(FrameRef::new("villin.pdb", 0), 100, Some("openmm".into()), 4);
//!
//! let plan = Workflow::new("seed")
//!     .submit(seeds)
//!     .wait_for(project.on_ntraj(4))
//!     .build();
//! project.add_event(plan).await?;
//! project.run()?;
//! # Ok(())
//! # }
//! ```

use crate::bundle::{Bundle, CachePolicy, Entity, ViewBundle};
use crate::condition::{Condition, MinCount};
use crate::config::{AdaptiveConfig, StoreBackend};
use crate::constants::{fields, kinds};
use crate::error::{AdaptiveError, Result};
use crate::events::EventInput;
use crate::models::{
    ConfigurationSelector, FrameRef, LogEntry, Model, ResourceConfiguration, Submission, Task,
    Trajectory, TrajectoryNames, Worker,
};
use crate::orchestration::{
    system_clock, BackgroundDriver, Clock, EventHandle, Orchestrator, TriggerReport,
};
use crate::state_machine::TaskState;
use crate::store::{EntityStore, InMemoryStore, Patch};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Project {
    config: AdaptiveConfig,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    tasks: Bundle<Task>,
    workers: Bundle<Worker>,
    all_trajectories: Bundle<Trajectory>,
    models: Bundle<Model>,
    configurations: Bundle<ResourceConfiguration>,
    logs: Bundle<LogEntry>,
    orchestrator: Arc<Orchestrator>,
    names: TrajectoryNames,
    current: RwLock<Option<ResourceConfiguration>>,
    driver: Mutex<Option<BackgroundDriver>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.config.project)
            .field("backend", &self.store.backend_name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Open (or create) the project on the backend named in `config`
    pub async fn open(config: AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        let store = Self::connect_store(&config).await?;
        Self::open_with(config, store, system_clock()).await
    }

    /// Project on a fresh private in-memory store
    pub async fn open_in_memory(name: impl Into<String>) -> Result<Self> {
        Self::open_with(
            AdaptiveConfig::for_project(name),
            Arc::new(InMemoryStore::new()),
            system_clock(),
        )
        .await
    }

    /// Open the project on an existing store handle
    pub async fn open_with(
        config: AdaptiveConfig,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let prefix = Self::collection_prefix(&config);
        let cache = &config.cache;

        let tasks: Bundle<Task> =
            Self::open_bundle(&store, &prefix, cache.tasks, &[fields::STATE, fields::WORKER]).await?;
        let workers: Bundle<Worker> =
            Self::open_bundle(&store, &prefix, cache.workers, &[fields::STATE]).await?;
        let all_trajectories: Bundle<Trajectory> =
            Self::open_bundle(&store, &prefix, cache.trajectories, &[fields::EXISTS]).await?;
        let models: Bundle<Model> = Self::open_bundle(&store, &prefix, cache.models, &[]).await?;
        let configurations: Bundle<ResourceConfiguration> = Self::open_bundle(
            &store,
            &prefix,
            cache.configurations,
            &[fields::NAME, fields::CURRENT],
        )
        .await?;
        let logs: Bundle<LogEntry> = Self::open_bundle(&store, &prefix, cache.logs, &[]).await?;

        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            tasks.clone(),
            workers.clone(),
            logs.clone(),
            clock.clone(),
        ));

        let names = TrajectoryNames::new(config.project.clone());
        names.initialize_from(all_trajectories.all().await?.iter());

        let current = configurations.matching(fields::CURRENT, true).await?;
        let current = match <[ResourceConfiguration; 1]>::try_from(current) {
            Ok([only]) => {
                orchestrator.set_resource(Some(only.resource_name.clone()));
                Some(only)
            }
            Err(_) => None,
        };

        info!(
            project = %config.project,
            backend = store.backend_name(),
            "📁 Project opened"
        );

        Ok(Self {
            config,
            store,
            clock,
            tasks,
            workers,
            all_trajectories,
            models,
            configurations,
            logs,
            orchestrator,
            names,
            current: RwLock::new(current),
            driver: Mutex::new(None),
        })
    }

    async fn connect_store(config: &AdaptiveConfig) -> Result<Arc<dyn EntityStore>> {
        match config.store.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            #[cfg(feature = "postgres")]
            StoreBackend::Postgres => {
                let url = config.store.database_url.as_deref().unwrap_or_default();
                let store = crate::store::PgStore::connect(url, config.store.max_connections)
                    .await
                    .map_err(|e| AdaptiveError::store_read("adaptive_collections", e))?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            StoreBackend::Postgres => Err(AdaptiveError::store_read(
                "adaptive_collections",
                crate::store::StoreError::unavailable("built without the postgres feature"),
            )),
        }
    }

    fn collection_prefix(config: &AdaptiveConfig) -> String {
        format!(
            "{}{}.",
            config.store.collection_prefix.as_deref().unwrap_or_default(),
            config.project
        )
    }

    async fn open_bundle<T: Entity>(
        store: &Arc<dyn EntityStore>,
        prefix: &str,
        policy: CachePolicy,
        indices: &[&str],
    ) -> Result<Bundle<T>> {
        let bundle = Bundle::open(store.clone(), format!("{prefix}{}", T::KIND), policy).await?;
        for field in indices {
            bundle.create_index(field).await?;
        }
        Ok(bundle)
    }

    pub fn name(&self) -> &str {
        &self.config.project
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn tasks(&self) -> &Bundle<Task> {
        &self.tasks
    }

    pub fn workers(&self) -> &Bundle<Worker> {
        &self.workers
    }

    /// Trajectory files that exist
    pub fn trajectories(&self) -> ViewBundle<Trajectory> {
        self.all_trajectories
            .by(fields::EXISTS, true)
            .named("trajectories")
    }

    /// Every trajectory, including requested ones not produced yet
    pub fn all_trajectories(&self) -> &Bundle<Trajectory> {
        &self.all_trajectories
    }

    pub fn models(&self) -> &Bundle<Model> {
        &self.models
    }

    pub fn configurations(&self) -> &Bundle<ResourceConfiguration> {
        &self.configurations
    }

    pub fn logs(&self) -> &Bundle<LogEntry> {
        &self.logs
    }

    /// Register events and run one trigger cycle
    pub async fn add_event(&self, event: impl Into<EventInput>) -> Result<Vec<EventHandle>> {
        let handles = self.orchestrator.add_event(event).await?;
        info!(
            added = handles.len(),
            remaining = self.orchestrator.pending_events().await,
            "Events added"
        );
        Ok(handles)
    }

    pub async fn trigger(&self) -> Result<TriggerReport> {
        self.orchestrator.trigger().await
    }

    pub async fn events_done(&self) -> bool {
        self.orchestrator.events_done().await
    }

    /// Trigger and poll until `condition` holds. There is no timeout; wrap
    /// the future in `tokio::time::timeout` for a bounded wait.
    pub async fn wait_until(&self, condition: &dyn Condition) -> Result<()> {
        let interval = self.config.orchestrator.wait_poll_interval();
        while !condition.check().await? {
            self.trigger().await?;
            tokio::time::sleep(interval).await;
        }
        debug!(condition = %condition.describe().await, "wait satisfied");
        Ok(())
    }

    /// [`wait_until`](Self::wait_until) for each condition in turn
    pub async fn wait_until_all(&self, conditions: &[&dyn Condition]) -> Result<()> {
        for condition in conditions {
            self.wait_until(*condition).await?;
        }
        Ok(())
    }

    /// Holds once at least `n` trajectory files exist
    pub fn on_ntraj(&self, n: usize) -> MinCount<ViewBundle<Trajectory>> {
        MinCount::new(self.trajectories(), n)
    }

    pub fn on_ntraj_each(
        &self,
        numbers: impl IntoIterator<Item = usize>,
    ) -> Vec<MinCount<ViewBundle<Trajectory>>> {
        numbers.into_iter().map(|n| self.on_ntraj(n)).collect()
    }

    /// Holds once at least `n` models exist
    pub fn on_nmodel(&self, n: usize) -> MinCount<Bundle<Model>> {
        MinCount::new(self.models.clone(), n)
    }

    pub fn on_nmodel_each(
        &self,
        numbers: impl IntoIterator<Item = usize>,
    ) -> Vec<MinCount<Bundle<Model>>> {
        numbers.into_iter().map(|n| self.on_nmodel(n)).collect()
    }

    /// Submit work items for workers; each becomes a queued task
    pub async fn queue<S: Into<Submission>>(
        &self,
        items: impl IntoIterator<Item = S>,
    ) -> Result<Vec<Task>> {
        let submissions = items.into_iter().map(Into::into).collect();
        self.orchestrator.queue(submissions).await
    }

    /// `number` trajectories under unused locations. Nothing is stored
    /// until the trajectories are queued or added.
    pub fn new_trajectory(
        &self,
        frame: FrameRef,
        length: u64,
        engine: Option<String>,
        number: usize,
    ) -> Vec<Trajectory> {
        (0..number)
            .map(|_| {
                Trajectory::new(
                    self.names.next_location(),
                    frame.clone(),
                    length,
                    engine.clone(),
                )
            })
            .collect()
    }

    /// Drop the task cache so the next read reloads from the store
    pub fn reload_tasks(&self) {
        self.tasks.clear_cache();
        self.tasks.reload_indices();
    }

    /// Number of tasks in each state; `deep` re-syncs with the store first
    pub async fn task_states(&self, deep: bool) -> Result<BTreeMap<TaskState, usize>> {
        if deep {
            self.reload_tasks();
        }
        let mut tally = BTreeMap::new();
        for task in self.tasks.all().await? {
            *tally.entry(task.state).or_insert(0) += 1;
        }
        Ok(tally)
    }

    /// Make exactly one configuration current; anything other than a single
    /// match is a [`AdaptiveError::ConfigurationSelection`]
    pub async fn select_configuration(
        &self,
        selector: ConfigurationSelector,
    ) -> Result<ResourceConfiguration> {
        let candidates = match &selector {
            ConfigurationSelector::Named(name) => {
                self.configurations.matching(fields::NAME, name.as_str()).await?
            }
            ConfigurationSelector::Current => {
                self.configurations.matching(fields::CURRENT, true).await?
            }
            ConfigurationSelector::Only => self.configurations.refreshed().await?,
        };

        let mut selected = match <[ResourceConfiguration; 1]>::try_from(candidates) {
            Ok([only]) => only,
            Err(candidates) if candidates.is_empty() => {
                return Err(AdaptiveError::ConfigurationSelection(format!(
                    "no configuration matches {selector:?}"
                )))
            }
            Err(candidates) => {
                let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
                return Err(AdaptiveError::ConfigurationSelection(format!(
                    "{selector:?} is ambiguous between {}",
                    names.join(", ")
                )));
            }
        };

        for previous in self.configurations.matching(fields::CURRENT, true).await? {
            if previous.id != selected.id {
                self.configurations
                    .update(previous.id, &Patch::new().set(fields::CURRENT, false), None)
                    .await?;
            }
        }
        if !selected.current {
            selected = self
                .configurations
                .update(selected.id, &Patch::new().set(fields::CURRENT, true), None)
                .await?
                .into_inner();
        }

        self.orchestrator
            .set_resource(Some(selected.resource_name.clone()));
        *self.current.write() = Some(selected.clone());
        info!(configuration = %selected.name, resource = %selected.resource_name, "Configuration selected");
        Ok(selected)
    }

    pub fn current_configuration(&self) -> Option<ResourceConfiguration> {
        self.current.read().clone()
    }

    /// Start the background driver; a no-op when already running.
    ///
    /// The driver lives on the tokio runtime of the caller. Called outside
    /// a runtime this fails with [`AdaptiveError::Runtime`] and starts
    /// nothing.
    pub fn run(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AdaptiveError::Runtime(e.to_string()))?;
        let mut driver = self.driver.lock();
        if driver.is_none() {
            *driver = Some(BackgroundDriver::spawn_on(
                &runtime,
                self.orchestrator.clone(),
                self.config.orchestrator.trigger_interval(),
            ));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().as_ref().is_some_and(BackgroundDriver::is_running)
    }

    /// Stop the background driver and wait for its loop to end
    pub async fn stop(&self) {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.stop().await;
        }
    }

    pub async fn close(self) {
        self.stop().await;
        let pending = self.orchestrator.pending_events().await;
        if pending > 0 {
            warn!(pending, project = %self.config.project, "closing project with unfinished events");
        }
        info!(project = %self.config.project, "Project closed");
    }

    /// Names of every project stored in `store`
    pub async fn list_projects(store: &dyn EntityStore) -> Result<Vec<String>> {
        let collections = store
            .list_collections()
            .await
            .map_err(|e| AdaptiveError::store_read("collections", e))?;
        let names: BTreeSet<String> = collections
            .into_iter()
            .filter(|info| kinds::ALL.contains(&info.kind.as_str()))
            .filter_map(|info| {
                info.name
                    .strip_suffix(&format!(".{}", info.kind))
                    .map(str::to_string)
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Drop every collection of project `name`. Cannot be undone.
    pub async fn delete_project(store: &dyn EntityStore, name: &str) -> Result<usize> {
        let prefix = format!("{name}.");
        let collections = store
            .list_collections()
            .await
            .map_err(|e| AdaptiveError::store_read("collections", e))?;
        let mut dropped = 0;
        for info in collections.into_iter().filter(|info| {
            info.name
                .strip_prefix(&prefix)
                .is_some_and(|kind| kind == info.kind && kinds::ALL.contains(&kind))
        }) {
            store
                .drop_collection(&info.name)
                .await
                .map_err(|e| AdaptiveError::store_write(info.name.clone(), e))?;
            dropped += 1;
        }
        warn!(project = %name, collections = dropped, "🗑️ Project deleted");
        Ok(dropped)
    }
}
