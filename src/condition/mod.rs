//! # Conditions
//!
//! Side-effect free predicates over live store state, polled by events and
//! by `wait_until` until they hold. A condition never blocks or sleeps; the
//! caller decides how often to ask.
//!
//! Count conditions can be shifted with [`Condition::offset`], which returns
//! a new condition and leaves the original untouched:
//!
//! ```rust
//! use adaptive_core::bundle::Bundle;
//! use adaptive_core::condition::{Condition, MinCount};
//! use adaptive_core::models::Model;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let models: Bundle<Model> = Bundle::in_memory();
//! let two = MinCount::new(models.clone(), 2);
//! let four = two.offset(2).expect("count conditions support offsets");
//!
//! models.add(Model::new(json!({ "score": 0.5 }))).await?;
//! models.add(Model::new(json!({ "score": 0.7 }))).await?;
//! assert!(two.check().await?);
//! assert!(!four.check().await?);
//! # Ok::<(), adaptive_core::AdaptiveError>(())
//! # }).unwrap();
//! ```

mod combinators;
mod count;
mod tasks;

pub use combinators::{all_of, any_of, from_fn, not, AllOf, AnyOf, FnCondition, Not};
pub use count::{Countable, MinCount};
pub use tasks::TasksSettled;

use crate::error::Result;
use async_trait::async_trait;

pub type BoxCondition = Box<dyn Condition>;

#[async_trait]
pub trait Condition: Send + Sync {
    /// Whether the condition holds right now
    async fn check(&self) -> Result<bool>;

    /// Human readable state of the condition, for diagnostics
    async fn describe(&self) -> String;

    /// The same condition shifted by `delta` ("n more than now"), when the
    /// condition has a numeric threshold
    fn offset(&self, _delta: i64) -> Option<BoxCondition> {
        None
    }
}

#[async_trait]
impl Condition for Box<dyn Condition> {
    async fn check(&self) -> Result<bool> {
        self.as_ref().check().await
    }

    async fn describe(&self) -> String {
        self.as_ref().describe().await
    }

    fn offset(&self, delta: i64) -> Option<BoxCondition> {
        self.as_ref().offset(delta)
    }
}

/// Boxing shorthand for building condition lists
pub trait ConditionExt: Condition + Sized + 'static {
    fn boxed(self) -> BoxCondition {
        Box::new(self)
    }
}

impl<C: Condition + 'static> ConditionExt for C {}
