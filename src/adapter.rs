//! Protocol adapters
//!
//! One adapter instance serves one connection and performs the actual device
//! reads. The polling worker calls it only while holding the connection's
//! polled-tag lock, so an adapter never sees two cycles of its connection at
//! once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProcessLinkError;
use crate::sink::Sample;
use crate::tag::{Tag, TagValue};

/// Common trait for all device protocols
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Open the device session. Called once when a polling worker starts.
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Close the device session. Called once when a polling worker exits.
    async fn disconnect(&self) {}

    /// Read the current value of one tag
    async fn read(
        &self,
        tag: &dyn Tag,
        cycle_start: DateTime<Utc>,
    ) -> Result<(TagValue, DateTime<Utc>), AdapterError>;

    /// Samples contributed by one tag in one cycle
    ///
    /// Adapters that buffer several values per tag between cycles override
    /// this; the default is a single read. Failures become failed samples.
    async fn read_samples(&self, tag: &dyn Tag, cycle_start: DateTime<Utc>) -> Vec<Sample> {
        match self.read(tag, cycle_start).await {
            Ok((value, timestamp)) => vec![Sample::value(value, timestamp)],
            Err(e) => {
                let reason = e.to_string();
                let err = ProcessLinkError::TagRead {
                    tag_id: tag.id().to_string(),
                    reason: reason.clone(),
                };
                tracing::warn!(connection_id = %tag.connection_id(), "{}", err);
                vec![Sample::failed(reason, cycle_start)]
            }
        }
    }
}

/// Errors reported by protocol adapters
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Unsupported tag: {0}")]
    UnsupportedTag(String),
}
