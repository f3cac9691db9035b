//! Update sink
//!
//! Every polling cycle of every connection ends with one [`Batch`] handed to
//! the shared [`UpdateSink`]. Submission must never block the worker, so the
//! stock sink is an unbounded tokio channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::tag::TagValue;

/// Outcome of reading one tag once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleValue {
    Value(TagValue),
    Failed { reason: String },
}

/// One timestamped reading of a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: SampleValue,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn value(value: TagValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: SampleValue::Value(value),
            timestamp,
        }
    }

    pub fn failed(reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: SampleValue::Failed {
                reason: reason.into(),
            },
            timestamp,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.value, SampleValue::Failed { .. })
    }

    /// The read value, if the read succeeded
    pub fn as_value(&self) -> Option<&TagValue> {
        match &self.value {
            SampleValue::Value(v) => Some(v),
            SampleValue::Failed { .. } => None,
        }
    }
}

/// Samples from one polling cycle of one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub connection_id: String,
    pub cycle_start: DateTime<Utc>,
    /// tag id → samples
    pub samples: HashMap<String, Vec<Sample>>,
}

impl Batch {
    pub fn failed_count(&self) -> usize {
        self.samples
            .values()
            .flatten()
            .filter(|s| s.is_failed())
            .count()
    }
}

/// Receives per-cycle sample batches from all connections
pub trait UpdateSink: Send + Sync {
    fn submit_batch(&self, batch: Batch);
}

/// Sink that forwards batches over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Batch>,
}

impl ChannelSink {
    /// Create a sink and the receiver its batches arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UpdateSink for ChannelSink {
    fn submit_batch(&self, batch: Batch) {
        if let Err(e) = self.tx.send(batch) {
            tracing::trace!(
                connection_id = %e.0.connection_id,
                "Batch dropped, no receiver"
            );
        }
    }
}
