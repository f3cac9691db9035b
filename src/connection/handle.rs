//! The Connection
//!
//! Owns the tags of one device, the polled-tag set and the polling worker.
//!
//! # Locking
//!
//! The polled-tag set sits behind one async mutex. The worker holds it for the
//! whole read phase of a cycle; `update_polled_tags` and `remove_polled_tags`
//! hold it for the whole mutation and for the start/stop decision that
//! follows. Lock order is polled set, then tag map, then worker slot, then
//! fault record; nothing takes them in the opposite direction.
//!
//! Every started worker gets a new generation number. A worker that gives up
//! on its own only clears `polling` and reports its fault if it is still the
//! current generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, RwLock};

use super::settings::ConnectionSettings;
use super::status::{ConnectionFault, ConnectionStatus, FaultKind, PollStats};
use super::worker;
use crate::adapter::ProtocolAdapter;
use crate::error::{ProcessLinkError, Result};
use crate::params::Params;
use crate::registry::{ConnectionFamily, ConnectionRegistry};
use crate::sink::{Batch, Sample, UpdateSink};
use crate::tag::Tag;

/// Default bound on waiting for the polled-tag lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// What a connection needs from whoever supervises it
#[derive(Clone)]
pub struct ConnectionContext {
    pub sink: Arc<dyn UpdateSink>,
    /// Where fatal worker errors are escalated
    pub faults: Option<mpsc::UnboundedSender<ConnectionFault>>,
    pub lock_timeout: Duration,
}

impl ConnectionContext {
    pub fn new(sink: Arc<dyn UpdateSink>) -> Self {
        Self {
            sink,
            faults: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Builder method: report faults on this channel
    pub fn faults(mut self, tx: mpsc::UnboundedSender<ConnectionFault>) -> Self {
        self.faults = Some(tx);
        self
    }

    /// Builder method: set the lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// The current worker, if one was ever started
#[derive(Default)]
pub(super) struct WorkerSlot {
    pub(super) generation: u64,
    pub(super) stop: Option<watch::Sender<bool>>,
    /// Flips to true once the worker has exited
    pub(super) exited: Option<watch::Receiver<bool>>,
}

/// A logical link to one device
pub struct Connection {
    pub(super) settings: ConnectionSettings,
    family: Arc<ConnectionFamily>,
    pub(super) adapter: Arc<dyn ProtocolAdapter>,
    pub(super) sink: Arc<dyn UpdateSink>,
    faults: Option<mpsc::UnboundedSender<ConnectionFault>>,
    lock_timeout: Duration,
    pub(super) tags: RwLock<HashMap<String, Arc<dyn Tag>>>,
    polled_tags: Mutex<Vec<String>>,
    polling: AtomicBool,
    worker: Mutex<WorkerSlot>,
    pub(super) stats: PollStats,
    last_samples: RwLock<HashMap<String, Sample>>,
    fault: RwLock<Option<ConnectionFault>>,
}

impl Connection {
    /// Build a connection through the registry
    ///
    /// Requires `id` and `connection_type`; the family fills in defaults for
    /// everything else.
    pub fn create(
        registry: &ConnectionRegistry,
        params: &Params,
        context: ConnectionContext,
    ) -> Result<Arc<Self>> {
        params.require_str("id")?;
        let connection_type = params.require_str("connection_type")?;
        let family = registry.family(connection_type)?;
        let parts = family.build_connection(params)?;

        tracing::debug!(
            connection_id = %parts.settings.id,
            connection_type = %parts.settings.connection_type,
            pollrate = ?parts.settings.pollrate,
            "Connection created"
        );

        Ok(Arc::new(Self {
            settings: parts.settings,
            family,
            adapter: parts.adapter,
            sink: context.sink,
            faults: context.faults,
            lock_timeout: context.lock_timeout,
            tags: RwLock::new(HashMap::new()),
            polled_tags: Mutex::new(Vec::new()),
            polling: AtomicBool::new(false),
            worker: Mutex::new(WorkerSlot::default()),
            stats: PollStats::default(),
            last_samples: RwLock::new(HashMap::new()),
            fault: RwLock::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn connection_type(&self) -> &str {
        &self.settings.connection_type
    }

    pub fn description(&self) -> &str {
        &self.settings.description
    }

    pub fn pollrate(&self) -> Duration {
        self.settings.pollrate
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connection attributes as a property bag, for persistence
    pub fn to_params(&self) -> Params {
        self.settings.to_params()
    }

    // ==================== Tags ====================

    /// Create a tag of this connection's family and register it
    ///
    /// The tag's `connection_id` is always this connection. A tag with the same
    /// id is replaced. On error the tag map is left untouched.
    pub async fn new_tag(&self, mut params: Params) -> Result<Arc<dyn Tag>> {
        params.insert("connection_id", self.id());
        let tag = self.family.new_tag(&params)?;

        let replaced = self
            .tags
            .write()
            .await
            .insert(tag.id().to_string(), Arc::clone(&tag))
            .is_some();

        tracing::debug!(
            connection_id = %self.id(),
            tag_id = %tag.id(),
            tag_type = %tag.tag_type(),
            replaced,
            "Tag registered"
        );
        Ok(tag)
    }

    /// Rebuild an existing tag from new parameters
    ///
    /// Parameters left out keep their current values.
    pub async fn update_tag(&self, params: Params) -> Result<Arc<dyn Tag>> {
        let id = params.require_str("id")?.to_string();
        let current = self.tag(&id).await.ok_or_else(|| {
            ProcessLinkError::invalid("id", format!("no tag '{}' on connection {}", id, self.id()))
        })?;

        let mut merged = current.params();
        merged.merge(&params);
        self.new_tag(merged).await
    }

    /// Drop a tag and stop polling it
    ///
    /// On error neither the tag map nor the polled-tag set has changed.
    pub async fn remove_tag(self: &Arc<Self>, tag_id: &str) -> Result<bool> {
        let mut polled = self.lock_polled().await?;
        if self.tags.write().await.remove(tag_id).is_none() {
            return Ok(false);
        }

        let before = polled.len();
        polled.retain(|id| id != tag_id);
        if polled.len() != before {
            self.set_polling(!polled.is_empty()).await;
        }
        drop(polled);

        self.last_samples.write().await.remove(tag_id);
        tracing::debug!(connection_id = %self.id(), tag_id, "Tag removed");
        Ok(true)
    }

    pub async fn tag(&self, tag_id: &str) -> Option<Arc<dyn Tag>> {
        self.tags.read().await.get(tag_id).cloned()
    }

    pub async fn tags(&self) -> Vec<Arc<dyn Tag>> {
        self.tags.read().await.values().cloned().collect()
    }

    pub async fn tag_count(&self) -> usize {
        self.tags.read().await.len()
    }

    /// Most recent sample recorded for a tag
    pub async fn last_sample(&self, tag_id: &str) -> Option<Sample> {
        self.last_samples.read().await.get(tag_id).cloned()
    }

    // ==================== Polled-tag set ====================

    pub(super) async fn lock_polled(&self) -> Result<MutexGuard<'_, Vec<String>>> {
        tokio::time::timeout(self.lock_timeout, self.polled_tags.lock())
            .await
            .map_err(|_| ProcessLinkError::LockTimeout {
                connection_id: self.id().to_string(),
            })
    }

    /// Snapshot of the ids currently polled
    pub async fn polled_tags(&self) -> Result<Vec<String>> {
        Ok(self.lock_polled().await?.clone())
    }

    /// Replace the polled-tag set with exactly `tag_ids`
    ///
    /// Retained ids keep their position, new ids are appended in input order
    /// and duplicates are ignored. Polling starts if the resulting set is
    /// non-empty and stops if it is empty.
    pub async fn update_polled_tags<S: AsRef<str>>(self: &Arc<Self>, tag_ids: &[S]) -> Result<()> {
        let mut wanted: Vec<&str> = Vec::with_capacity(tag_ids.len());
        for id in tag_ids.iter().map(AsRef::as_ref) {
            if !wanted.contains(&id) {
                wanted.push(id);
            }
        }

        let mut polled = self.lock_polled().await?;
        polled.retain(|id| wanted.contains(&id.as_str()));
        for id in wanted {
            if !polled.iter().any(|p| p == id) {
                polled.push(id.to_string());
            }
        }

        tracing::debug!(connection_id = %self.id(), tags = ?*polled, "Polled tags updated");
        self.set_polling(!polled.is_empty()).await;
        Ok(())
    }

    /// Remove `tag_ids` from the polled-tag set, leaving the rest untouched
    ///
    /// Polling stops if nothing is left to poll.
    pub async fn remove_polled_tags<S: AsRef<str>>(self: &Arc<Self>, tag_ids: &[S]) -> Result<()> {
        let mut polled = self.lock_polled().await?;
        polled.retain(|id| !tag_ids.iter().any(|r| r.as_ref() == id));

        tracing::debug!(connection_id = %self.id(), tags = ?*polled, "Polled tags reduced");
        self.set_polling(!polled.is_empty()).await;
        Ok(())
    }

    // ==================== Polling ====================

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Start or stop the polling worker
    ///
    /// Starting a running worker and stopping a stopped one are no-ops.
    /// Stopping only raises the stop flag; the worker exits at its next cycle
    /// boundary. A worker started while its predecessor is still winding down
    /// waits for it before running its first cycle. Starting a worker clears
    /// the fault left by the previous one.
    pub async fn set_polling(self: &Arc<Self>, should_poll: bool) {
        let mut slot = self.worker.lock().await;

        if should_poll {
            if self.polling.load(Ordering::Acquire) {
                return;
            }

            slot.generation += 1;
            let (stop_tx, stop_rx) = watch::channel(false);
            let (exited_tx, exited_rx) = watch::channel(false);
            let previous = slot.exited.replace(exited_rx);
            slot.stop = Some(stop_tx);
            self.polling.store(true, Ordering::Release);
            *self.fault.write().await = None;

            tokio::spawn(worker::run(
                Arc::downgrade(self),
                slot.generation,
                stop_rx,
                previous,
                exited_tx,
            ));
            tracing::info!(connection_id = %self.id(), generation = slot.generation, "Polling requested");
        } else {
            self.request_stop(&slot);
        }
    }

    fn request_stop(&self, slot: &WorkerSlot) {
        if !self.polling.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(stop) = &slot.stop {
            let _ = stop.send(true);
        }
        tracing::info!(connection_id = %self.id(), "Polling stop requested");
    }

    /// Generation of the most recently started worker, 0 if none
    pub async fn worker_generation(&self) -> u64 {
        self.worker.lock().await.generation
    }

    /// Wait until the current worker has exited, for at most `limit`
    pub async fn wait_stopped(&self, limit: Duration) -> Result<()> {
        let exited = self.worker.lock().await.exited.clone();
        let Some(mut exited) = exited else {
            return Ok(());
        };

        // A dropped sender means the worker is gone as well
        let waited = tokio::time::timeout(limit, exited.wait_for(|done| *done))
            .await
            .map(|r| r.is_ok());
        match waited {
            Ok(_) => Ok(()),
            Err(_) => Err(ProcessLinkError::StopTimeout {
                connection_id: self.id().to_string(),
            }),
        }
    }

    /// Stop polling and wait for the worker to exit
    ///
    /// The wait is bounded by one pollrate plus `grace`.
    pub async fn stop(self: &Arc<Self>, grace: Duration) -> Result<()> {
        self.set_polling(false).await;
        self.wait_stopped(self.pollrate() + grace).await
    }

    /// Stop the worker of `generation` and wait for it to exit
    ///
    /// Returns `false` without touching anything if a newer worker has been
    /// started since.
    pub async fn stop_worker(self: &Arc<Self>, generation: u64, grace: Duration) -> Result<bool> {
        {
            let slot = self.worker.lock().await;
            if slot.generation != generation {
                return Ok(false);
            }
            self.request_stop(&slot);
        }
        self.wait_stopped(self.pollrate() + grace).await?;
        Ok(true)
    }

    pub(super) async fn record_batch(&self, batch: &Batch) {
        self.stats.record(batch);
        let mut last = self.last_samples.write().await;
        for (tag_id, samples) in batch.samples.iter() {
            if let Some(sample) = samples.last() {
                last.insert(tag_id.clone(), sample.clone());
            }
        }
    }

    // ==================== Faults ====================

    /// Called by a worker giving up on a fatal error
    ///
    /// Clears `polling` before the fault is recorded and passed up, so a
    /// `connect` that follows always starts a new worker. Faults from a
    /// replaced worker are only logged.
    pub(super) async fn escalate(&self, generation: u64, kind: FaultKind) {
        let slot = self.worker.lock().await;
        if slot.generation != generation {
            tracing::warn!(connection_id = %self.id(), generation, fault = %kind, "Fault from a replaced worker");
            return;
        }
        self.polling.store(false, Ordering::Release);

        let fault = ConnectionFault::new(self.id(), generation, kind);
        tracing::error!(connection_id = %self.id(), fault = %fault.kind, "Connection faulted");

        *self.fault.write().await = Some(fault.clone());
        if let Some(tx) = &self.faults {
            let _ = tx.send(fault);
        }
    }

    pub async fn fault(&self) -> Option<ConnectionFault> {
        self.fault.read().await.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        let polled_tags = match self.polled_tags().await {
            Ok(polled) => polled.len(),
            Err(_) => 0,
        };

        ConnectionStatus {
            id: self.id().to_string(),
            connection_type: self.connection_type().to_string(),
            description: self.description().to_string(),
            polling: self.is_polling(),
            tags: self.tag_count().await,
            polled_tags,
            cycles: self.stats.cycles(),
            failed_samples: self.stats.failed_samples(),
            last_cycle: self.stats.last_cycle(),
            fault: self.fault().await,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.settings.id)
            .field("connection_type", &self.settings.connection_type)
            .field("polling", &self.is_polling())
            .finish()
    }
}
