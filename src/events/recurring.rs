use super::{Advance, Event, PlanAction};
use crate::condition::{BoxCondition, Condition};
use crate::error::{AdaptiveError, Result};
use async_trait::async_trait;

/// Fires an action every time its trigger condition holds.
///
/// After each firing the trigger is replaced by its offset by `every`
/// (e.g. "5 more trajectories"); a trigger without offset support fires
/// once. The event finishes when `until` holds or after `times` firings.
pub struct RecurringEvent {
    trigger: Option<BoxCondition>,
    every: i64,
    until: Option<BoxCondition>,
    remaining: Option<usize>,
    action: Option<Box<dyn PlanAction>>,
    fired: usize,
}

impl RecurringEvent {
    pub fn on(trigger: impl Condition + 'static) -> Self {
        Self {
            trigger: Some(Box::new(trigger)),
            every: 1,
            until: None,
            remaining: None,
            action: None,
            fired: 0,
        }
    }

    pub fn every(mut self, step: i64) -> Self {
        self.every = step;
        self
    }

    pub fn until(mut self, condition: impl Condition + 'static) -> Self {
        self.until = Some(Box::new(condition));
        self
    }

    pub fn times(mut self, limit: usize) -> Self {
        self.remaining = Some(limit);
        self
    }

    pub fn run(mut self, action: Box<dyn PlanAction>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn fired(&self) -> usize {
        self.fired
    }

    fn finish(&mut self) {
        self.trigger = None;
    }
}

#[async_trait]
impl Event for RecurringEvent {
    fn is_pending(&self) -> bool {
        self.trigger.is_some() && self.action.is_some() && self.remaining != Some(0)
    }

    async fn advance(&mut self) -> Result<Advance> {
        if !self.is_pending() {
            return Ok(Advance::idle());
        }

        if let Some(until) = &self.until {
            if until.check().await? {
                self.finish();
                return Ok(Advance::idle());
            }
        }

        let (Some(trigger), Some(action)) = (&self.trigger, &self.action) else {
            return Ok(Advance::idle());
        };
        if !trigger.check().await? {
            return Ok(Advance::idle());
        }

        let emission = action.run().await.map_err(|e| {
            AdaptiveError::EventAction(format!("recurring event firing {}: {e:#}", self.fired + 1))
        })?;
        let next = trigger.offset(self.every);

        self.fired += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        match next {
            Some(next) => self.trigger = Some(next),
            None => self.finish(),
        }
        Ok(Advance::progressed(emission))
    }

    async fn describe(&self) -> String {
        match &self.trigger {
            Some(trigger) if self.is_pending() => format!(
                "recurring event (fired {}) waiting for {}",
                self.fired,
                trigger.describe().await
            ),
            _ => format!("recurring event finished after {} firings", self.fired),
        }
    }
}
