//! Construction parameters
//!
//! Connections and tags are built from a flat property bag, the same shape
//! that is written to and read back from the configuration store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProcessLinkError, Result};

/// String-keyed property bag backed by a JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder method: set a property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Copy every property of `other` into this bag, overwriting on collision
    pub fn merge(&mut self, other: &Params) {
        for (k, v) in other.0.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Get a required string property
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)?
            .ok_or_else(|| ProcessLinkError::MissingProperty(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ProcessLinkError::invalid(
                key,
                format!("expected a string, got {}", other),
            )),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                ProcessLinkError::invalid(key, format!("expected a number, got {}", v))
            }),
        }
    }

    pub fn get_u16(&self, key: &str) -> Result<Option<u16>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    ProcessLinkError::invalid(key, format!("expected a port number, got {}", v))
                }),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(ProcessLinkError::invalid(
                key,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(s)?))
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Params {
    type Error = ProcessLinkError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProcessLinkError::invalid(
                "params",
                format!("expected an object, got {}", other),
            )),
        }
    }
}
