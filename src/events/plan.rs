use super::{Advance, BoxEvent, Emission, Event};
use crate::condition::{BoxCondition, Condition};
use crate::error::{AdaptiveError, Result};
use crate::models::Submission;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;

/// Author-supplied step body
#[async_trait]
pub trait PlanAction: Send + Sync {
    async fn run(&self) -> anyhow::Result<Emission>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F> PlanAction for FnAction<F>
where
    F: Fn() -> anyhow::Result<Emission> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<Emission> {
        (self.0)()
    }
}

struct AsyncFnAction<F>(F);

#[async_trait]
impl<F> PlanAction for AsyncFnAction<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<Emission>> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<Emission> {
        (self.0)().await
    }
}

/// Wrap a closure as a step action
pub fn action<F>(f: F) -> Box<dyn PlanAction>
where
    F: Fn() -> anyhow::Result<Emission> + Send + Sync + 'static,
{
    Box::new(FnAction(f))
}

/// Wrap a future-returning closure as a step action
pub fn async_action<F>(f: F) -> Box<dyn PlanAction>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<Emission>> + Send + Sync + 'static,
{
    Box::new(AsyncFnAction(f))
}

pub enum StepAction {
    Submit(Vec<Submission>),
    Spawn(Vec<BoxEvent>),
    Run(Box<dyn PlanAction>),
    /// Only waits for the gate
    Noop,
}

impl StepAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::Spawn(_) => "spawn",
            Self::Run(_) => "run",
            Self::Noop => "wait",
        }
    }
}

/// A gated step: the action runs once the gate (if any) holds
pub struct PlanStep {
    pub gate: Option<BoxCondition>,
    pub action: StepAction,
}

impl PlanStep {
    pub fn new(gate: Option<BoxCondition>, action: StepAction) -> Self {
        Self { gate, action }
    }
}

/// Resumable sequence of gated steps.
///
/// The cursor only moves after a step's action completed, and completed
/// steps are dropped, so no step's side effects ever run twice.
pub struct ExecutionPlan {
    name: String,
    steps: VecDeque<PlanStep>,
    completed: usize,
}

impl ExecutionPlan {
    pub fn new(name: impl Into<String>, steps: impl IntoIterator<Item = PlanStep>) -> Self {
        Self {
            name: name.into(),
            steps: steps.into_iter().collect(),
            completed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completed_steps(&self) -> usize {
        self.completed
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("name", &self.name)
            .field("completed", &self.completed)
            .field("remaining", &self.steps.len())
            .finish()
    }
}

#[async_trait]
impl Event for ExecutionPlan {
    fn is_pending(&self) -> bool {
        !self.steps.is_empty()
    }

    async fn advance(&mut self) -> Result<Advance> {
        let Some(step) = self.steps.front_mut() else {
            return Ok(Advance::idle());
        };

        if let Some(gate) = &step.gate {
            if !gate.check().await? {
                return Ok(Advance::idle());
            }
        }

        let emission = match &mut step.action {
            StepAction::Submit(items) => Emission::submit(std::mem::take(items)),
            StepAction::Spawn(events) => Emission {
                submissions: Vec::new(),
                events: std::mem::take(events),
            },
            StepAction::Run(action) => action.run().await.map_err(|e| {
                AdaptiveError::EventAction(format!(
                    "plan '{}' step {}: {e:#}",
                    self.name,
                    self.completed + 1
                ))
            })?,
            StepAction::Noop => Emission::none(),
        };

        self.steps.pop_front();
        self.completed += 1;
        Ok(Advance::progressed(emission))
    }

    async fn describe(&self) -> String {
        let total = self.completed + self.steps.len();
        match self.steps.front() {
            None => format!("plan '{}' finished ({total} steps)", self.name),
            Some(step) => {
                let waiting = match &step.gate {
                    Some(gate) => gate.describe().await,
                    None => "nothing".to_string(),
                };
                format!(
                    "plan '{}' step {}/{total} ({}) waiting for {waiting}",
                    self.name,
                    self.completed + 1,
                    step.action.name()
                )
            }
        }
    }
}

/// Builder normalizing an author's "wait, then do" sequence into an
/// [`ExecutionPlan`]
pub struct Workflow {
    name: String,
    steps: Vec<PlanStep>,
    pending_gate: Option<BoxCondition>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            pending_gate: None,
        }
    }

    /// Gate the next step on `condition`
    pub fn wait_for(mut self, condition: impl Condition + 'static) -> Self {
        if let Some(previous) = self.pending_gate.take() {
            self.steps.push(PlanStep::new(Some(previous), StepAction::Noop));
        }
        self.pending_gate = Some(Box::new(condition));
        self
    }

    fn push(mut self, action: StepAction) -> Self {
        let gate = self.pending_gate.take();
        self.steps.push(PlanStep::new(gate, action));
        self
    }

    pub fn submit<S: Into<Submission>>(self, items: impl IntoIterator<Item = S>) -> Self {
        self.push(StepAction::Submit(items.into_iter().map(Into::into).collect()))
    }

    pub fn spawn(self, event: impl Event + 'static) -> Self {
        self.push(StepAction::Spawn(vec![Box::new(event)]))
    }

    pub fn run(self, action: Box<dyn PlanAction>) -> Self {
        self.push(StepAction::Run(action))
    }

    pub fn build(mut self) -> ExecutionPlan {
        if let Some(gate) = self.pending_gate.take() {
            self.steps.push(PlanStep::new(Some(gate), StepAction::Noop));
        }
        ExecutionPlan::new(self.name, self.steps)
    }
}
