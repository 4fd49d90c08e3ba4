//! Periodic trigger driver.
//!
//! A tokio task that calls [`Orchestrator::try_trigger`] every
//! `trigger_interval`. Overlapping ticks are skipped rather than queued, and
//! a failed cycle is logged and retried on the next tick.

use super::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct BackgroundDriver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl BackgroundDriver {
    /// Spawn on the runtime of the calling task. Panics outside a runtime;
    /// see [`BackgroundDriver::spawn_on`].
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self::spawn_on(&Handle::current(), orchestrator, interval)
    }

    /// Start ticking on `runtime`; the first trigger runs after one full
    /// interval
    pub fn spawn_on(runtime: &Handle, orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycles = 0u64;

            info!(interval_ms = interval.as_millis() as u64, "▶️ Background driver started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match orchestrator.try_trigger().await {
                            Ok(Some(_)) => cycles += 1,
                            Ok(None) => debug!("tick skipped, trigger in progress"),
                            Err(e) => error!(error = %e, "background trigger failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(cycles, "⏹️ Background driver stopped");
            cycles
        });

        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for it; returns the number of cycles run
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(cycles) => cycles,
            Err(e) => {
                error!(error = %e, "background driver task ended abnormally");
                0
            }
        }
    }
}
