//! Local connections
//!
//! A local connection has no device behind it. Each tag reports its configured
//! `value`, or the neutral value of its datatype when none is set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

use crate::adapter::{AdapterError, ProtocolAdapter};
use crate::connection::ConnectionSettings;
use crate::error::{ProcessLinkError, Result};
use crate::params::Params;
use crate::registry::{ConnectionFamily, ConnectionParts};
use crate::tag::{Tag, TagInfo, TagValue};

pub const CONNECTION_TYPE: &str = "local";

/// Default seconds between cycles
pub const DEFAULT_POLLRATE: f64 = 0.5;

pub const TAG_PARAMETERS: &[&str] = &[
    "id",
    "connection_id",
    "description",
    "datatype",
    "tag_type",
    "value",
];

/// The local family
pub fn family() -> ConnectionFamily {
    ConnectionFamily::new(CONNECTION_TYPE, |params: &Params| {
        let settings = ConnectionSettings::from_params(params, CONNECTION_TYPE, DEFAULT_POLLRATE)?;
        Ok(ConnectionParts {
            settings,
            adapter: Arc::new(LocalAdapter),
        })
    })
    .tag_type(CONNECTION_TYPE, LocalTag::construct)
    .tag_parameters(TAG_PARAMETERS)
}

/// Tag with an optional fixed value
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTag {
    info: TagInfo,
    value: Option<TagValue>,
}

impl LocalTag {
    pub fn new(params: &Params) -> Result<Self> {
        let info = TagInfo::from_params(params, CONNECTION_TYPE)?;
        let value = match params.get("value") {
            None => None,
            Some(v) => Some(TagValue::from_json(v).ok_or_else(|| {
                ProcessLinkError::invalid("value", format!("expected a scalar, got {}", v))
            })?),
        };

        Ok(Self { info, value })
    }

    fn construct(params: &Params) -> Result<Arc<dyn Tag>> {
        Ok(Arc::new(Self::new(params)?))
    }

    pub fn value(&self) -> Option<&TagValue> {
        self.value.as_ref()
    }
}

impl Tag for LocalTag {
    fn info(&self) -> &TagInfo {
        &self.info
    }

    fn params(&self) -> Params {
        let mut params = self.info.to_params();
        if let Some(value) = &self.value {
            params.insert("value", value.clone());
        }
        params
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Adapter that answers every read from the tag's own configuration
#[derive(Debug, Default)]
pub struct LocalAdapter;

#[async_trait]
impl ProtocolAdapter for LocalAdapter {
    async fn read(
        &self,
        tag: &dyn Tag,
        cycle_start: DateTime<Utc>,
    ) -> Result<(TagValue, DateTime<Utc>), AdapterError> {
        let local = tag
            .as_any()
            .downcast_ref::<LocalTag>()
            .ok_or_else(|| AdapterError::UnsupportedTag(tag.id().to_string()))?;

        let value = local
            .value
            .clone()
            .unwrap_or_else(|| TagValue::default_for(&local.info.datatype));
        Ok((value, cycle_start))
    }
}
