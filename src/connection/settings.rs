//! Connection settings
//!
//! The attributes every connection has, plus the family-specific fields
//! carried along untouched so they can be persisted.

use serde::Serialize;
use std::time::Duration;

use crate::error::{ProcessLinkError, Result};
use crate::params::Params;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSettings {
    /// Unique across a manager
    pub id: String,
    /// Family discriminant
    pub connection_type: String,
    pub description: String,
    /// Target time between the starts of consecutive cycles
    pub pollrate: Duration,
    /// Connect right after being restored from storage
    pub auto_connect: bool,
    /// Family-specific fields such as host and port
    pub extra: Params,
}

impl ConnectionSettings {
    /// Parse the common fields
    ///
    /// `id` and `connection_type` are required. The stored type is always the
    /// family's own name.
    pub fn from_params(params: &Params, connection_type: &str, default_pollrate: f64) -> Result<Self> {
        let id = params.require_str("id")?.to_string();
        params.require_str("connection_type")?;

        let pollrate = params.get_f64("pollrate")?.unwrap_or(default_pollrate);
        if !pollrate.is_finite() || pollrate <= 0.0 {
            return Err(ProcessLinkError::invalid(
                "pollrate",
                format!("must be a positive number of seconds, got {}", pollrate),
            ));
        }

        Ok(Self {
            id,
            connection_type: connection_type.to_string(),
            description: params.get_str("description")?.unwrap_or_default().to_string(),
            pollrate: Duration::from_secs_f64(pollrate),
            auto_connect: params.get_bool("auto_connect")?.unwrap_or(false),
            extra: Params::new(),
        })
    }

    /// Builder method: attach family-specific fields
    pub fn with_extra(mut self, extra: Params) -> Self {
        self.extra = extra;
        self
    }

    /// Every attribute as a property bag, for persistence
    pub fn to_params(&self) -> Params {
        let mut params = Params::new()
            .with("id", self.id.as_str())
            .with("connection_type", self.connection_type.as_str())
            .with("description", self.description.as_str())
            .with("pollrate", self.pollrate.as_secs_f64())
            .with("auto_connect", self.auto_connect);
        params.merge(&self.extra);
        params
    }
}
