//! Lookup, patch and compare-and-set vocabulary shared by all store backends.

use super::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conjunction of field equalities used by `find` and `count`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    clauses: Vec<(String, Value)>,
}

impl Query {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Combine two queries; both sets of clauses must hold
    pub fn merge(mut self, other: &Query) -> Self {
        self.clauses.extend(other.clauses.iter().cloned());
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| document.field(field).unwrap_or(&Value::Null) == value)
    }
}

/// Top-level field assignments applied by `update`; `null` clears a field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    set: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.set
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub(crate) fn apply(&self, document: &mut Document) {
        for (field, value) in &self.set {
            document.set_field(field, value.clone());
        }
    }
}

/// Expected value of one field for a compare-and-set update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    Equals(Value),
    OneOf(Vec<Value>),
}

impl Expectation {
    fn holds(&self, actual: &Value) -> bool {
        match self {
            Self::Equals(expected) => expected == actual,
            Self::OneOf(candidates) => candidates.iter().any(|c| c == actual),
        }
    }
}

/// Guard evaluated atomically with an update; a missing field reads as `null`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    clauses: Vec<(String, Expectation)>,
}

impl Precondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push((field.into(), Expectation::Equals(value.into())));
        self
    }

    pub fn one_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.into(), Expectation::OneOf(values)));
        self
    }

    /// Add every clause of `other`
    pub fn merge(mut self, other: &Precondition) -> Self {
        self.clauses.extend(other.clauses.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Expectation)] {
        &self.clauses
    }

    pub fn holds(&self, document: &Document) -> bool {
        self.clauses.iter().all(|(field, expectation)| {
            expectation.holds(document.field(field).unwrap_or(&Value::Null))
        })
    }
}

/// Result of an update: either applied, or refused because the
/// precondition no longer held (the current document is returned)
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(Document),
    Conflict(Document),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn document(&self) -> &Document {
        match self {
            Self::Applied(doc) | Self::Conflict(doc) => doc,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            Self::Applied(doc) | Self::Conflict(doc) => doc,
        }
    }
}
