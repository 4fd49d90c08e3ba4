//! # Entity State Machines
//!
//! Explicit transition tables for [`Task`](crate::models::Task) and
//! [`Worker`](crate::models::Worker). `determine_target_state` is the pure
//! table; the machines apply it through compare-and-set updates on the
//! backing bundles so cross-process races resolve in the store.

pub mod errors;
pub mod events;
pub mod states;
pub mod task_state_machine;
pub mod worker_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{TaskEvent, WorkerEvent};
pub use states::{DeadWorkerPolicy, TaskState, WorkerState};
pub use task_state_machine::TaskStateMachine;
pub use worker_state_machine::WorkerStateMachine;
