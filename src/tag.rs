//! Tags
//!
//! A tag is a named data point on one connection. Tags are immutable once
//! built: the owning connection changes a tag by replacing it, so the polling
//! worker always reads a consistent snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;

use crate::error::Result;
use crate::params::Params;

/// A value read from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// Convert a JSON scalar; arrays, objects and null have no tag value
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(TagValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(TagValue::Int)
                .or_else(|| n.as_f64().map(TagValue::Float)),
            Value::String(s) => Some(TagValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Neutral value for a declared datatype
    pub fn default_for(datatype: &str) -> Self {
        match datatype.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => TagValue::Bool(false),
            "int" | "integer" | "dint" | "sint" | "lint" => TagValue::Int(0),
            "string" | "text" => TagValue::Text(String::new()),
            _ => TagValue::Float(0.0),
        }
    }
}

impl From<TagValue> for Value {
    fn from(value: TagValue) -> Self {
        match value {
            TagValue::Bool(b) => Value::Bool(b),
            TagValue::Int(i) => Value::from(i),
            TagValue::Float(f) => Value::from(f),
            TagValue::Text(s) => Value::String(s),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Attributes shared by every tag family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    /// Unique within the owning connection
    pub id: String,
    /// Owning connection; fixed at creation
    pub connection_id: String,
    pub description: String,
    pub datatype: String,
    /// Family discriminant
    pub tag_type: String,
}

impl TagInfo {
    /// Parse the common tag fields
    ///
    /// `id` and `connection_id` are required; everything else defaults to empty.
    pub fn from_params(params: &Params, tag_type: &str) -> Result<Self> {
        let id = params.require_str("id")?.to_string();
        let connection_id = params.require_str("connection_id")?.to_string();

        Ok(Self {
            id,
            connection_id,
            description: params.get_str("description")?.unwrap_or_default().to_string(),
            datatype: params.get_str("datatype")?.unwrap_or_default().to_string(),
            tag_type: tag_type.to_string(),
        })
    }

    /// The common fields as a property bag
    pub fn to_params(&self) -> Params {
        Params::new()
            .with("id", self.id.as_str())
            .with("connection_id", self.connection_id.as_str())
            .with("description", self.description.as_str())
            .with("datatype", self.datatype.as_str())
            .with("tag_type", self.tag_type.as_str())
    }
}

/// A data point bound to one connection
///
/// Family-specific tags carry their own fields (a register address, say) and
/// expose them to their protocol adapter through [`Tag::as_any`].
pub trait Tag: Send + Sync + fmt::Debug {
    fn info(&self) -> &TagInfo;

    /// Every attribute of the tag, for persistence
    fn params(&self) -> Params;

    fn as_any(&self) -> &dyn Any;

    fn id(&self) -> &str {
        &self.info().id
    }

    fn connection_id(&self) -> &str {
        &self.info().connection_id
    }

    fn tag_type(&self) -> &str {
        &self.info().tag_type
    }
}
