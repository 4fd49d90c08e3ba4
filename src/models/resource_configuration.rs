use crate::bundle::Entity;
use crate::constants::kinds;
use crate::store::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named description of an execution resource. At most one configuration
/// of a project is `current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    pub id: EntityId,
    pub name: String,
    pub resource_name: String,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl ResourceConfiguration {
    pub fn new(name: impl Into<String>, resource_name: impl Into<String>, settings: Value) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            resource_name: resource_name.into(),
            current: false,
            settings,
            created: None,
            modified: None,
        }
    }
}

impl Entity for ResourceConfiguration {
    const KIND: &'static str = kinds::CONFIGURATIONS;

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Which configuration `Project::select_configuration` should make current
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationSelector {
    /// The configuration with this name
    Named(String),
    /// The one already flagged as current
    Current,
    /// The only stored configuration
    Only,
}
