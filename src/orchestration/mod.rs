//! # Orchestration
//!
//! The scheduler proper: the [`Orchestrator`] trigger loop, the worker
//! [`fault_sweep`], the periodic [`driver`] and the [`Clock`] seam used for
//! heartbeat arithmetic.

pub mod clock;
pub mod driver;
pub mod fault_sweep;
pub mod orchestrator;

pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use driver::BackgroundDriver;
pub use fault_sweep::{SweepReport, WorkerSweeper};
pub use orchestrator::{EventHandle, Orchestrator, TriggerReport};
