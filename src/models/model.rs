use crate::bundle::Entity;
use crate::constants::kinds;
use crate::store::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of an analysis task (e.g. a Markov state model); opaque data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: EntityId,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Model {
    pub fn new(data: Value) -> Self {
        Self {
            id: EntityId::new(),
            data,
            created: None,
            modified: None,
        }
    }
}

impl Entity for Model {
    const KIND: &'static str = kinds::MODELS;

    fn id(&self) -> EntityId {
        self.id
    }
}
