use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fields owned by the store rather than by the entity that wrote the document
pub const CREATED_FIELD: &str = "created";
pub const MODIFIED_FIELD: &str = "modified";

/// Unique identifier of a stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::String(id.to_string())
    }
}

/// A JSON document as held by the store
///
/// `created` and `modified` are assigned by the backend on insert and on
/// every update; whatever an entity serializes under those keys is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: EntityId,
    pub body: Value,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(id: EntityId, body: Value) -> Self {
        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.remove(CREATED_FIELD);
            map.remove(MODIFIED_FIELD);
        }
        Self {
            id,
            body,
            created: None,
            modified: None,
        }
    }

    /// Serialize an entity into an unstamped document
    pub fn encode<T: Serialize>(id: EntityId, entity: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, serde_json::to_value(entity)?))
    }

    /// Deserialize the document, folding the store timestamps back in
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut body = self.body.clone();
        if let Value::Object(map) = &mut body {
            if let Some(created) = self.created {
                map.insert(CREATED_FIELD.to_string(), serde_json::to_value(created)?);
            }
            if let Some(modified) = self.modified {
                map.insert(MODIFIED_FIELD.to_string(), serde_json::to_value(modified)?);
            }
        }
        serde_json::from_value(body)
    }

    /// Resolve a dotted field path (`descriptor.kind`) inside the body
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.body, |value, segment| value.get(segment))
    }

    pub(crate) fn set_field(&mut self, key: &str, value: Value) {
        match &mut self.body {
            Value::Object(map) => {
                map.insert(key.to_string(), value);
            }
            other => {
                let mut map = Map::new();
                map.insert(key.to_string(), value);
                *other = Value::Object(map);
            }
        }
    }
}
