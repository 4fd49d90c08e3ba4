//! # Events and Execution Plans
//!
//! An [`Event`] is a resumable workflow unit. The orchestrator advances each
//! pending event once per pass; an advance may emit work (task submissions
//! and sub-events) and reports whether it made progress. Once an event stops
//! being pending it never becomes pending again.
//!
//! [`ExecutionPlan`] is the general form: an ordered list of gated steps
//! advanced by an explicit cursor. [`Workflow`] builds plans the way a
//! workflow author thinks about them ("wait for X, then submit Y, then wait
//! for Z ..."). [`RecurringEvent`] fires an action every time an advancing
//! condition holds.

mod plan;
mod recurring;

pub use plan::{action, async_action, ExecutionPlan, PlanAction, PlanStep, StepAction, Workflow};
pub use recurring::RecurringEvent;

use crate::error::Result;
use crate::models::Submission;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-local identity of a registered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work produced by one advance
#[derive(Default)]
pub struct Emission {
    pub submissions: Vec<Submission>,
    pub events: Vec<BoxEvent>,
}

impl Emission {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn submit<S: Into<Submission>>(items: impl IntoIterator<Item = S>) -> Self {
        Self {
            submissions: items.into_iter().map(Into::into).collect(),
            events: Vec::new(),
        }
    }

    pub fn spawn(event: impl Event + 'static) -> Self {
        Self {
            submissions: Vec::new(),
            events: vec![Box::new(event)],
        }
    }

    pub fn and_submit<S: Into<Submission>>(mut self, items: impl IntoIterator<Item = S>) -> Self {
        self.submissions.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn and_spawn(mut self, event: impl Event + 'static) -> Self {
        self.events.push(Box::new(event));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty() && self.events.is_empty()
    }
}

impl fmt::Debug for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emission")
            .field("submissions", &self.submissions.len())
            .field("events", &self.events.len())
            .finish()
    }
}

/// Outcome of advancing an event once
#[derive(Debug, Default)]
pub struct Advance {
    pub emission: Emission,
    /// Whether the event moved forward (ran a step) during this advance
    pub progressed: bool,
}

impl Advance {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn progressed(emission: Emission) -> Self {
        Self {
            emission,
            progressed: true,
        }
    }
}

#[async_trait]
pub trait Event: Send + Sync {
    /// Whether steps remain; once false it stays false
    fn is_pending(&self) -> bool;

    /// Advance at most one step. Advancing a finished event returns
    /// [`Advance::idle`] and has no side effects. On error the event is
    /// left where it was so the next cycle retries the same step.
    async fn advance(&mut self) -> Result<Advance>;

    async fn describe(&self) -> String;
}

pub type BoxEvent = Box<dyn Event>;

/// One event or several, as accepted by `add_event`
pub enum EventInput {
    One(BoxEvent),
    Many(Vec<BoxEvent>),
}

impl EventInput {
    pub fn into_events(self) -> Vec<BoxEvent> {
        match self {
            Self::One(event) => vec![event],
            Self::Many(events) => events,
        }
    }
}

impl From<BoxEvent> for EventInput {
    fn from(event: BoxEvent) -> Self {
        Self::One(event)
    }
}

impl From<Vec<BoxEvent>> for EventInput {
    fn from(events: Vec<BoxEvent>) -> Self {
        Self::Many(events)
    }
}

impl From<ExecutionPlan> for EventInput {
    fn from(plan: ExecutionPlan) -> Self {
        Self::One(Box::new(plan))
    }
}

impl From<Workflow> for EventInput {
    fn from(workflow: Workflow) -> Self {
        Self::One(Box::new(workflow.build()))
    }
}

impl From<RecurringEvent> for EventInput {
    fn from(event: RecurringEvent) -> Self {
        Self::One(Box::new(event))
    }
}
