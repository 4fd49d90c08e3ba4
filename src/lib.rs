#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Adaptive Core
//!
//! Orchestration engine for adaptive simulation workflows: long-running
//! tasks are farmed out to a pool of remote workers while declarative
//! workflows react to the data those tasks produce.
//!
//! ## Architecture
//!
//! Everything the scheduler reasons about lives in one shared entity store.
//! Worker processes only talk to the store (claims, heartbeats, terminal
//! states); the orchestrator never calls a worker directly.
//!
//! - **Bundles** give a cached, query-able view over one collection, with
//!   no, strong or bounded (LRU) caching and live filtered views.
//! - **Conditions** are pure predicates over bundles, polled until they hold.
//! - **Events** are resumable execution plans that emit tasks and sub-events
//!   as their conditions are met.
//! - The **orchestrator** advances every event once per pass under a single
//!   lock, bounded against self-feeding event chains, then sweeps workers
//!   whose heartbeat went silent and reclaims their tasks.
//!
//! ## Module Organization
//!
//! - [`store`] - Entity store adapter trait with in-memory and PostgreSQL backends
//! - [`bundle`] - Cached collection handles and views
//! - [`condition`] - Composable predicates
//! - [`events`] - Execution plans, workflows and recurring events
//! - [`state_machine`] - Task and worker lifecycles
//! - [`orchestration`] - Trigger loop, fault sweep and background driver
//! - [`project`] - Facade for workflow authors
//! - [`worker`] - Worker side of the store protocol
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use adaptive_core::{Project, Workflow};
//! use adaptive_core::models::FrameRef;
//!
//! # async fn example() -> adaptive_core::Result<()> {
//! let project = Project::open_in_memory("villin").await?;
//! let seeds = project.new_trajectory(FrameRef::new("villin.pdb", 0), 100, Some("openmm".into()), 2);
//!
//! project
//!     .add_event(Workflow::new("seed").submit(seeds).build())
//!     .await?;
//! println!("{:?}", project.task_states(false).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests; PostgreSQL tests need DATABASE_URL and --ignored
//! ```

pub mod bundle;
pub mod condition;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod project;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use bundle::{Bundle, CachePolicy, Entity, ViewBundle};
pub use condition::{Condition, ConditionExt, MinCount};
pub use config::{AdaptiveConfig, ConfigManager};
pub use error::{AdaptiveError, Result};
pub use events::{Event, ExecutionPlan, RecurringEvent, Workflow};
pub use orchestration::{Orchestrator, TriggerReport};
pub use project::Project;
pub use state_machine::{DeadWorkerPolicy, TaskState, WorkerState};
pub use worker::WorkerAgent;
