//! Faults and status reporting

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::ProcessLinkError;
use crate::sink::Batch;

/// Why a polling worker gave up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum FaultKind {
    #[error("timed out waiting for the polled-tag lock")]
    LockTimeout,

    #[error("adapter connect failed: {0}")]
    AdapterConnect(String),
}

/// A fatal worker error, escalated to the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionFault {
    pub connection_id: String,
    /// Worker that raised the fault
    pub generation: u64,
    pub kind: FaultKind,
    pub at: DateTime<Utc>,
}

impl ConnectionFault {
    pub fn new(connection_id: impl Into<String>, generation: u64, kind: FaultKind) -> Self {
        Self {
            connection_id: connection_id.into(),
            generation,
            kind,
            at: Utc::now(),
        }
    }
}

impl From<ConnectionFault> for ProcessLinkError {
    fn from(fault: ConnectionFault) -> Self {
        match fault.kind {
            FaultKind::LockTimeout => ProcessLinkError::LockTimeout {
                connection_id: fault.connection_id,
            },
            FaultKind::AdapterConnect(reason) => {
                ProcessLinkError::Adapter(crate::adapter::AdapterError::Connect(reason))
            }
        }
    }
}

/// Counters updated by the polling worker
#[derive(Debug, Default)]
pub(crate) struct PollStats {
    cycles: AtomicU64,
    failed_samples: AtomicU64,
    /// Unix millis of the last submitted batch, 0 when none
    last_cycle_ms: AtomicI64,
}

impl PollStats {
    pub(crate) fn record(&self, batch: &Batch) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.failed_samples
            .fetch_add(batch.failed_count() as u64, Ordering::Relaxed);
        self.last_cycle_ms
            .store(batch.cycle_start.timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub(crate) fn failed_samples(&self) -> u64 {
        self.failed_samples.load(Ordering::Relaxed)
    }

    pub(crate) fn last_cycle(&self) -> Option<DateTime<Utc>> {
        match self.last_cycle_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// Point-in-time view of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub id: String,
    pub connection_type: String,
    pub description: String,
    pub polling: bool,
    pub tags: usize,
    pub polled_tags: usize,
    pub cycles: u64,
    pub failed_samples: u64,
    pub last_cycle: Option<DateTime<Utc>>,
    pub fault: Option<ConnectionFault>,
}

/// Aggregate counts across a manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollingSummary {
    pub connections: usize,
    pub polling: usize,
    pub faulted: usize,
}

impl std::fmt::Display for PollingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} connections, {} polling, {} faulted",
            self.connections, self.polling, self.faulted
        )
    }
}
