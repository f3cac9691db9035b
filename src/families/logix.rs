//! Logix controllers
//!
//! Tags address controller symbols by name (`Program:Main.Counter`). Reading
//! them needs an EtherNet/IP client, which the embedding application provides
//! through the adapter factory given to [`family`].

use std::any::Any;
use std::sync::Arc;

use crate::adapter::ProtocolAdapter;
use crate::connection::ConnectionSettings;
use crate::error::Result;
use crate::params::Params;
use crate::registry::{ConnectionFamily, ConnectionParts};
use crate::tag::{Tag, TagInfo};

pub const CONNECTION_TYPE: &str = "logix";

pub const DEFAULT_POLLRATE: f64 = 1.0;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 44818;

pub const TAG_PARAMETERS: &[&str] = &[
    "id",
    "connection_id",
    "description",
    "datatype",
    "tag_type",
    "address",
    "value",
];

/// Where the controller is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogixSettings {
    pub host: String,
    pub port: u16,
}

impl LogixSettings {
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            host: params.get_str("host")?.unwrap_or(DEFAULT_HOST).to_string(),
            port: params.get_u16("port")?.unwrap_or(DEFAULT_PORT),
        })
    }

    fn to_params(&self) -> Params {
        Params::new()
            .with("host", self.host.as_str())
            .with("port", self.port)
    }
}

/// The logix family, reading through adapters built by `adapter`
pub fn family<F>(adapter: F) -> ConnectionFamily
where
    F: Fn(&LogixSettings) -> Arc<dyn ProtocolAdapter> + Send + Sync + 'static,
{
    ConnectionFamily::new(CONNECTION_TYPE, move |params: &Params| {
        let logix = LogixSettings::from_params(params)?;
        let settings = ConnectionSettings::from_params(params, CONNECTION_TYPE, DEFAULT_POLLRATE)?
            .with_extra(logix.to_params());

        Ok(ConnectionParts {
            adapter: adapter(&logix),
            settings,
        })
    })
    .tag_type(CONNECTION_TYPE, LogixTag::construct)
    .tag_parameters(TAG_PARAMETERS)
}

/// Tag bound to a controller symbol
#[derive(Debug, Clone, PartialEq)]
pub struct LogixTag {
    info: TagInfo,
    address: String,
}

impl LogixTag {
    pub fn new(params: &Params) -> Result<Self> {
        let info = TagInfo::from_params(params, CONNECTION_TYPE)?;
        let address = params.require_str("address")?.to_string();
        Ok(Self { info, address })
    }

    fn construct(params: &Params) -> Result<Arc<dyn Tag>> {
        Ok(Arc::new(Self::new(params)?))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Tag for LogixTag {
    fn info(&self) -> &TagInfo {
        &self.info
    }

    fn params(&self) -> Params {
        self.info.to_params().with("address", self.address.as_str())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
