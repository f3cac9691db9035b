//! Connection Manager
//!
//! Sole owner of the live connections, keyed by id. Creates them through the
//! type registry, starts and stops their polling workers, tears them down and
//! reports their status. A fault monitor task stops connections whose worker
//! escalated a fatal error.
//!
//! # Example
//!
//! ```rust,no_run
//! use process_link::manager::{ConnectionManager, ManagerConfig};
//! use process_link::params::Params;
//! use process_link::registry::ConnectionRegistry;
//! use process_link::sink::ChannelSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, mut batches) = ChannelSink::new();
//!     let manager = Arc::new(ConnectionManager::new(
//!         ConnectionRegistry::with_builtin(),
//!         Arc::new(sink),
//!         ManagerConfig::default(),
//!     ));
//!     let _monitor = manager.start_fault_monitor();
//!
//!     manager
//!         .add_connection(Params::new().with("id", "c1").with("connection_type", "local"))
//!         .await?;
//!     manager.attach_tag("c1", Params::new().with("id", "t1")).await?;
//!     manager.update_polled_tags("c1", &["t1"]).await?;
//!
//!     let batch = batches.recv().await.unwrap();
//!     println!("{} tags sampled", batch.samples.len());
//!
//!     manager.disconnect("c1").await?;
//!     Ok(())
//! }
//! ```

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::connection::{
    Connection, ConnectionContext, ConnectionFault, ConnectionStatus, PollingSummary,
    DEFAULT_LOCK_TIMEOUT,
};
use crate::error::{ProcessLinkError, Result};
use crate::params::Params;
use crate::registry::ConnectionRegistry;
use crate::sink::UpdateSink;
use crate::store::ConnectionStore;
use crate::tag::Tag;

/// Manager tuning
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on waiting for a connection's polled-tag lock
    pub lock_timeout: Duration,
    /// Added to a connection's pollrate to bound `disconnect`
    pub stop_grace: Duration,
    /// Connect restored connections flagged `auto_connect`
    pub auto_connect: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stop_grace: Duration::from_secs(1),
            auto_connect: true,
        }
    }
}

/// Supervises a population of connections
pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn UpdateSink>,
    config: ManagerConfig,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    fault_tx: mpsc::UnboundedSender<ConnectionFault>,
    fault_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionFault>>>,
}

impl ConnectionManager {
    pub fn new(
        registry: impl Into<Arc<ConnectionRegistry>>,
        sink: Arc<dyn UpdateSink>,
        config: ManagerConfig,
    ) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        Self {
            registry: registry.into(),
            sink,
            config,
            connections: RwLock::new(HashMap::new()),
            fault_tx,
            fault_rx: Mutex::new(Some(fault_rx)),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext::new(Arc::clone(&self.sink))
            .faults(self.fault_tx.clone())
            .lock_timeout(self.config.lock_timeout)
    }

    // ==================== Lifecycle ====================

    /// Build a connection through the registry and register it
    ///
    /// Fails with `DuplicateId` if the id is taken; the existing connection is
    /// left as it was.
    pub async fn add_connection(&self, params: Params) -> Result<Arc<Connection>> {
        let id = params.require_str("id")?.to_string();

        let mut connections = self.connections.write().await;
        if connections.contains_key(&id) {
            return Err(ProcessLinkError::DuplicateId(id));
        }

        let connection = Connection::create(&self.registry, &params, self.context())?;
        connections.insert(id.clone(), Arc::clone(&connection));

        tracing::info!(
            connection_id = %id,
            connection_type = %connection.connection_type(),
            "Connection added"
        );
        Ok(connection)
    }

    pub async fn get(&self, connection_id: &str) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| ProcessLinkError::UnknownConnection(connection_id.to_string()))
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    pub async fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create a tag on the named connection
    pub async fn attach_tag(&self, connection_id: &str, tag_params: Params) -> Result<Arc<dyn Tag>> {
        self.get(connection_id).await?.new_tag(tag_params).await
    }

    pub async fn update_polled_tags<S: AsRef<str>>(&self, connection_id: &str, tag_ids: &[S]) -> Result<()> {
        self.get(connection_id).await?.update_polled_tags(tag_ids).await
    }

    pub async fn remove_polled_tags<S: AsRef<str>>(&self, connection_id: &str, tag_ids: &[S]) -> Result<()> {
        self.get(connection_id).await?.remove_polled_tags(tag_ids).await
    }

    /// Start the named connection's polling worker
    ///
    /// A new worker clears any fault recorded by the previous one.
    pub async fn connect(&self, connection_id: &str) -> Result<()> {
        let connection = self.get(connection_id).await?;
        connection.set_polling(true).await;

        tracing::info!(connection_id, "Connection connected");
        Ok(())
    }

    /// Stop the named connection's polling worker
    ///
    /// Returns once the worker has exited, waiting at most one pollrate plus
    /// the configured grace.
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let connection = self.get(connection_id).await?;
        connection.stop(self.config.stop_grace).await?;

        tracing::info!(connection_id, "Connection disconnected");
        Ok(())
    }

    pub async fn is_polling(&self, connection_id: &str) -> Result<bool> {
        Ok(self.get(connection_id).await?.is_polling())
    }

    /// Disconnect a connection, then drop it from the registry
    ///
    /// The registry stays locked until the connection is gone, so nothing can
    /// reconnect it in between. If the worker does not stop in time the
    /// connection stays registered.
    pub async fn remove_connection(&self, connection_id: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| ProcessLinkError::UnknownConnection(connection_id.to_string()))?;

        connection.stop(self.config.stop_grace).await?;
        connections.remove(connection_id);
        drop(connections);

        tracing::info!(connection_id, "Connection removed");
        Ok(())
    }

    /// Stop every connection
    pub async fn shutdown(&self) {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        tracing::info!(connections = connections.len(), "Stopping all connections");

        let grace = self.config.stop_grace;
        let results = join_all(connections.iter().map(|c| c.stop(grace))).await;
        for result in results {
            if let Err(e) = result {
                tracing::error!("Shutdown: {}", e);
            }
        }
    }

    // ==================== Status ====================

    /// Status of every connection, ordered by id
    pub async fn status(&self) -> Vec<ConnectionStatus> {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();

        let mut status = Vec::with_capacity(connections.len());
        for connection in connections {
            status.push(connection.status().await);
        }
        status.sort_by(|a, b| a.id.cmp(&b.id));
        status
    }

    pub async fn connection_status(&self, connection_id: &str) -> Result<ConnectionStatus> {
        Ok(self.get(connection_id).await?.status().await)
    }

    pub async fn summary(&self) -> PollingSummary {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();

        let mut summary = PollingSummary {
            connections: connections.len(),
            ..Default::default()
        };
        for connection in connections {
            if connection.is_polling() {
                summary.polling += 1;
            }
            if connection.fault().await.is_some() {
                summary.faulted += 1;
            }
        }
        summary
    }

    // ==================== Faults ====================

    /// Start the background task that handles escalated worker faults
    ///
    /// Each fault stops the faulted connection; the fault stays recorded in its
    /// status until the next `connect`. Only the first call starts a task.
    pub fn start_fault_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(self);

        tokio::spawn(async move {
            let Some(this) = manager.upgrade() else {
                return;
            };
            let rx = this.fault_rx.lock().await.take();
            drop(this);

            let Some(mut rx) = rx else {
                tracing::warn!("Fault monitor already running");
                return;
            };

            while let Some(fault) = rx.recv().await {
                let Some(this) = Weak::upgrade(&manager) else {
                    break;
                };
                this.handle_fault(fault).await;
            }
        })
    }

    async fn handle_fault(&self, fault: ConnectionFault) {
        tracing::warn!(
            connection_id = %fault.connection_id,
            fault = %fault.kind,
            "Stopping faulted connection"
        );

        match self.get(&fault.connection_id).await {
            Ok(connection) => {
                match connection.stop_worker(fault.generation, self.config.stop_grace).await {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(
                        connection_id = %fault.connection_id,
                        generation = fault.generation,
                        "Faulted worker already replaced"
                    ),
                    Err(e) => tracing::error!(connection_id = %fault.connection_id, "{}", e),
                }
            }
            Err(_) => {
                tracing::debug!(connection_id = %fault.connection_id, "Faulted connection already removed");
            }
        }
    }

    // ==================== Persistence ====================

    /// Build a connection and its tags from the store
    ///
    /// A live connection with the same id is stopped and replaced while the
    /// registry is locked, so the swap is never observed half done.
    pub async fn load_connection(
        &self,
        store: &dyn ConnectionStore,
        connection_id: &str,
    ) -> Result<Arc<Connection>> {
        let params = store
            .load_connection(connection_id)?
            .ok_or_else(|| ProcessLinkError::UnknownConnection(connection_id.to_string()))?;
        let tags = store.load_tags(connection_id)?;

        let connection = Connection::create(&self.registry, &params, self.context())?;
        for tag_params in tags {
            connection.new_tag(tag_params).await?;
        }

        let mut connections = self.connections.write().await;
        if let Some(previous) = connections.get(connection_id) {
            tracing::info!(connection_id, "Reloading connection");
            previous.stop(self.config.stop_grace).await?;
        }
        connections.insert(connection_id.to_string(), Arc::clone(&connection));
        drop(connections);

        let tags = connection.tag_count().await;
        tracing::info!(connection_id, tags, "Connection loaded");
        Ok(connection)
    }

    /// Load every stored connection
    ///
    /// Connections that fail to build are logged and skipped. Returns how many
    /// were loaded.
    pub async fn restore(&self, store: &dyn ConnectionStore) -> Result<usize> {
        let mut loaded = 0;

        for id in store.connection_ids()? {
            let connection = match self.load_connection(store, &id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(connection_id = %id, "Skipping stored connection: {}", e);
                    continue;
                }
            };
            loaded += 1;

            if self.config.auto_connect && connection.settings().auto_connect {
                self.connect(&id).await?;
            }
        }

        tracing::info!("Restored {} connections", loaded);
        Ok(loaded)
    }

    /// Persist a connection and all of its tags
    pub async fn save_connection(&self, store: &dyn ConnectionStore, connection_id: &str) -> Result<String> {
        let connection = self.get(connection_id).await?;

        let id = store.save_connection(&connection.to_params())?;
        for tag in connection.tags().await {
            store.save_tag(&tag.params())?;
        }
        Ok(id)
    }

    /// Remove a connection, live and in the store
    pub async fn delete_connection(&self, store: &dyn ConnectionStore, connection_id: &str) -> Result<()> {
        match self.remove_connection(connection_id).await {
            Ok(()) | Err(ProcessLinkError::UnknownConnection(_)) => {}
            Err(e) => return Err(e),
        }
        store.delete_connection(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, ProtocolAdapter};
    use crate::connection::{ConnectionSettings, FaultKind};
    use crate::families::{logix, LocalTag, LogixTag};
    use crate::registry::{ConnectionFamily, ConnectionParts};
    use crate::sink::{Batch, ChannelSink};
    use crate::store::SqliteStore;
    use crate::tag::TagValue;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    /// Reads the address of a logix tag back as its value
    struct EchoAdapter;

    #[async_trait]
    impl ProtocolAdapter for EchoAdapter {
        async fn read(
            &self,
            tag: &dyn Tag,
            cycle_start: DateTime<Utc>,
        ) -> std::result::Result<(TagValue, DateTime<Utc>), AdapterError> {
            let tag = tag
                .as_any()
                .downcast_ref::<LogixTag>()
                .ok_or_else(|| AdapterError::UnsupportedTag(tag.id().to_string()))?;
            Ok((TagValue::Text(tag.address().to_string()), cycle_start))
        }
    }

    struct UnreachableAdapter;

    #[async_trait]
    impl ProtocolAdapter for UnreachableAdapter {
        async fn connect(&self) -> std::result::Result<(), AdapterError> {
            Err(AdapterError::Connect("host unreachable".to_string()))
        }

        async fn read(
            &self,
            _tag: &dyn Tag,
            cycle_start: DateTime<Utc>,
        ) -> std::result::Result<(TagValue, DateTime<Utc>), AdapterError> {
            Ok((TagValue::Int(0), cycle_start))
        }
    }

    /// Refuses the first connect, then behaves
    #[derive(Default)]
    struct FailOnceAdapter {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ProtocolAdapter for FailOnceAdapter {
        async fn connect(&self) -> std::result::Result<(), AdapterError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AdapterError::Connect("link down".to_string()));
            }
            Ok(())
        }

        async fn read(
            &self,
            _tag: &dyn Tag,
            cycle_start: DateTime<Utc>,
        ) -> std::result::Result<(TagValue, DateTime<Utc>), AdapterError> {
            Ok((TagValue::Int(1), cycle_start))
        }
    }

    /// Every read takes 200ms
    struct SlowAdapter;

    #[async_trait]
    impl ProtocolAdapter for SlowAdapter {
        async fn read(
            &self,
            _tag: &dyn Tag,
            cycle_start: DateTime<Utc>,
        ) -> std::result::Result<(TagValue, DateTime<Utc>), AdapterError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok((TagValue::Int(2), cycle_start))
        }
    }

    fn local_tag(params: &Params) -> Result<Arc<dyn Tag>> {
        Ok(Arc::new(LocalTag::new(params)?))
    }

    fn registry() -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::with_builtin();
        registry.register(logix::family(|_| Arc::new(EchoAdapter)));
        registry.register(ConnectionFamily::new("offline", |params: &Params| {
            Ok(ConnectionParts {
                settings: ConnectionSettings::from_params(params, "offline", 0.05)?,
                adapter: Arc::new(UnreachableAdapter),
            })
        }));
        registry.register(
            ConnectionFamily::new("flaky", |params: &Params| {
                Ok(ConnectionParts {
                    settings: ConnectionSettings::from_params(params, "flaky", 0.05)?,
                    adapter: Arc::new(FailOnceAdapter::default()),
                })
            })
            .tag_type("local", local_tag),
        );
        registry.register(
            ConnectionFamily::new("slow", |params: &Params| {
                Ok(ConnectionParts {
                    settings: ConnectionSettings::from_params(params, "slow", 0.02)?,
                    adapter: Arc::new(SlowAdapter),
                })
            })
            .tag_type("local", local_tag),
        );
        registry
    }

    fn manager_with(config: ManagerConfig) -> (Arc<ConnectionManager>, UnboundedReceiver<Batch>) {
        let (sink, rx) = ChannelSink::new();
        let manager = ConnectionManager::new(registry(), Arc::new(sink), config);
        (Arc::new(manager), rx)
    }

    fn manager() -> (Arc<ConnectionManager>, UnboundedReceiver<Batch>) {
        manager_with(ManagerConfig::default())
    }

    fn local(id: &str, pollrate: f64) -> Params {
        Params::new()
            .with("id", id)
            .with("connection_type", "local")
            .with("pollrate", pollrate)
    }

    #[tokio::test]
    async fn test_add_connection_starts_idle() {
        let (manager, _rx) = manager();
        manager.add_connection(local("c1", 0.5)).await.unwrap();

        assert!(!manager.is_polling("c1").await.unwrap());
        assert_eq!(manager.connection_ids().await, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_original() {
        let (manager, _rx) = manager();
        manager
            .add_connection(local("c1", 0.5).with("description", "original"))
            .await
            .unwrap();

        let err = manager
            .add_connection(local("c1", 0.1).with("description", "impostor"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessLinkError::DuplicateId(id) if id == "c1"));

        let conn = manager.get("c1").await.unwrap();
        assert_eq!(conn.description(), "original");
        assert_eq!(conn.pollrate(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_connection_everywhere() {
        let (manager, _rx) = manager();
        let unknown = |r: Result<()>| matches!(r, Err(ProcessLinkError::UnknownConnection(_)));

        assert!(matches!(
            manager.attach_tag("nope", Params::new().with("id", "t1")).await,
            Err(ProcessLinkError::UnknownConnection(_))
        ));
        assert!(unknown(manager.connect("nope").await));
        assert!(unknown(manager.disconnect("nope").await));
        assert!(unknown(manager.remove_connection("nope").await));
        assert!(unknown(manager.update_polled_tags("nope", &["t1"]).await));
        assert!(matches!(
            manager.is_polling("nope").await,
            Err(ProcessLinkError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_disconnect_waits_for_worker() {
        let (manager, _rx) = manager();
        manager.add_connection(local("c1", 0.2)).await.unwrap();
        manager
            .attach_tag("c1", Params::new().with("id", "t1"))
            .await
            .unwrap();

        manager.connect("c1").await.unwrap();
        assert!(manager.is_polling("c1").await.unwrap());

        manager.disconnect("c1").await.unwrap();
        assert!(!manager.is_polling("c1").await.unwrap());

        // Already exited: a near-zero wait succeeds
        let conn = manager.get("c1").await.unwrap();
        conn.wait_stopped(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_polling_scenario() {
        let (manager, mut rx) = manager();
        manager.add_connection(local("c1", 0.5)).await.unwrap();
        manager
            .attach_tag("c1", Params::new().with("id", "t1"))
            .await
            .unwrap();
        manager.update_polled_tags("c1", &["t1"]).await.unwrap();
        manager.connect("c1").await.unwrap();

        let batch = timeout(Duration::from_millis(900), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.connection_id, "c1");
        assert_eq!(batch.samples.keys().collect::<Vec<_>>(), vec!["t1"]);
        assert_eq!(batch.samples["t1"].len(), 1);
        assert!(!batch.samples["t1"][0].is_failed());

        manager.disconnect("c1").await.unwrap();
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_connection_stops_first() {
        let (manager, _rx) = manager();
        manager.add_connection(local("c1", 0.05)).await.unwrap();
        manager
            .attach_tag("c1", Params::new().with("id", "t1"))
            .await
            .unwrap();
        manager.update_polled_tags("c1", &["t1"]).await.unwrap();
        let conn = manager.get("c1").await.unwrap();

        manager.remove_connection("c1").await.unwrap();
        assert!(!conn.is_polling());
        assert!(!manager.contains("c1").await);

        // The id can be reused straight away
        manager.add_connection(local("c1", 0.05)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_monitor_stops_and_flags() {
        let (manager, _rx) = manager();
        let monitor = manager.start_fault_monitor();
        manager
            .add_connection(Params::new().with("id", "plc").with("connection_type", "offline"))
            .await
            .unwrap();

        manager.connect("plc").await.unwrap();

        let status = timeout(WAIT, async {
            loop {
                let status = manager.connection_status("plc").await.unwrap();
                if status.fault.is_some() && !status.polling {
                    break status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            status.fault.unwrap().kind,
            FaultKind::AdapterConnect(_)
        ));
        assert_eq!(manager.summary().await.faulted, 1);

        // A second monitor finds the receiver taken and exits
        timeout(WAIT, manager.start_fault_monitor()).await.unwrap().unwrap();
        monitor.abort();
    }

    #[tokio::test]
    async fn test_reconnect_after_fault_survives_monitor() {
        let (manager, mut rx) = manager();
        manager
            .add_connection(Params::new().with("id", "plc").with("connection_type", "flaky"))
            .await
            .unwrap();
        manager
            .attach_tag("plc", Params::new().with("id", "t1").with("tag_type", "local"))
            .await
            .unwrap();

        // First worker fails to connect and stops itself
        manager.update_polled_tags("plc", &["t1"]).await.unwrap();
        timeout(WAIT, async {
            loop {
                let status = manager.connection_status("plc").await.unwrap();
                if status.fault.is_some() && !status.polling {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        manager.connect("plc").await.unwrap();
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();

        // The queued fault belongs to the first worker and must not stop the second
        let monitor = manager.start_fault_monitor();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = manager.connection_status("plc").await.unwrap();
        assert!(status.polling);
        assert!(status.fault.is_none());

        while rx.try_recv().is_ok() {}
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();

        monitor.abort();
        manager.disconnect("plc").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_connection_keeps_unstoppable() {
        let (manager, _rx) = manager_with(ManagerConfig {
            stop_grace: Duration::ZERO,
            ..ManagerConfig::default()
        });
        manager
            .add_connection(Params::new().with("id", "s1").with("connection_type", "slow"))
            .await
            .unwrap();
        manager
            .attach_tag("s1", Params::new().with("id", "t1").with("tag_type", "local"))
            .await
            .unwrap();
        manager.update_polled_tags("s1", &["t1"]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Worker is inside a 200ms read and cannot stop within 20ms
        let err = manager.remove_connection("s1").await.unwrap_err();
        assert!(matches!(err, ProcessLinkError::StopTimeout { .. }));
        assert!(manager.contains("s1").await);

        let conn = manager.get("s1").await.unwrap();
        conn.wait_stopped(WAIT).await.unwrap();
        manager.remove_connection("s1").await.unwrap();
        assert!(!manager.contains("s1").await);
    }

    #[tokio::test]
    async fn test_reload_is_atomic_against_add() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (manager, _rx) = manager();
        let params = Params::new().with("id", "s1").with("connection_type", "slow");

        manager.add_connection(params.clone()).await.unwrap();
        manager
            .attach_tag("s1", Params::new().with("id", "t1").with("tag_type", "local"))
            .await
            .unwrap();
        manager.save_connection(store.as_ref(), "s1").await.unwrap();
        manager.update_polled_tags("s1", &["t1"]).await.unwrap();
        let old = manager.get("s1").await.unwrap();

        let reload = {
            let manager = Arc::clone(&manager);
            let store = Arc::clone(&store);
            tokio::spawn(async move { manager.load_connection(store.as_ref(), "s1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager.add_connection(params).await.unwrap_err();
        assert!(matches!(err, ProcessLinkError::DuplicateId(_)));

        let new = reload.await.unwrap().unwrap();
        assert!(!old.is_polling());
        assert!(Arc::ptr_eq(&manager.get("s1").await.unwrap(), &new));
        assert_eq!(new.tag_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (manager, _rx) = manager();

        manager
            .add_connection(local("c1", 0.05).with("auto_connect", true))
            .await
            .unwrap();
        manager
            .attach_tag("c1", Params::new().with("id", "t1").with("value", 5))
            .await
            .unwrap();
        manager
            .add_connection(
                Params::new()
                    .with("id", "plc")
                    .with("connection_type", "logix")
                    .with("host", "10.1.1.1"),
            )
            .await
            .unwrap();
        manager
            .attach_tag("plc", Params::new().with("id", "speed").with("address", "Line1.Speed"))
            .await
            .unwrap();

        manager.save_connection(&store, "c1").await.unwrap();
        manager.save_connection(&store, "plc").await.unwrap();

        let (restored, mut rx) = self::manager();
        assert_eq!(restored.restore(&store).await.unwrap(), 2);

        // Only the auto_connect connection is polling, with no tags selected yet
        assert!(restored.is_polling("c1").await.unwrap());
        assert!(!restored.is_polling("plc").await.unwrap());

        let plc = restored.get("plc").await.unwrap();
        assert_eq!(plc.settings().extra.get_str("host").unwrap(), Some("10.1.1.1"));
        let tag = plc.tag("speed").await.unwrap();
        assert_eq!(tag.connection_id(), "plc");

        restored.update_polled_tags("plc", &["speed"]).await.unwrap();
        let batch = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            batch.samples["speed"][0].as_value(),
            Some(&TagValue::Text("Line1.Speed".to_string()))
        );

        restored.shutdown().await;
        assert_eq!(restored.summary().await.polling, 0);
    }

    #[tokio::test]
    async fn test_restore_skips_unbuildable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_connection(&Params::new().with("id", "m1").with("connection_type", "modbus"))
            .unwrap();
        store.save_connection(&local("c1", 0.5)).unwrap();

        let (manager, _rx) = manager();
        assert_eq!(manager.restore(&store).await.unwrap(), 1);
        assert!(manager.contains("c1").await);
    }

    #[tokio::test]
    async fn test_reload_replaces_running_connection() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (manager, _rx) = manager();
        manager.add_connection(local("c1", 0.05)).await.unwrap();
        manager
            .attach_tag("c1", Params::new().with("id", "t1"))
            .await
            .unwrap();
        manager.save_connection(&store, "c1").await.unwrap();

        manager.update_polled_tags("c1", &["t1"]).await.unwrap();
        let old = manager.get("c1").await.unwrap();

        let new = manager.load_connection(&store, "c1").await.unwrap();
        assert!(!old.is_polling());
        assert!(!new.is_polling());
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.tag_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_connection() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (manager, _rx) = manager();
        manager.add_connection(local("c1", 0.5)).await.unwrap();
        manager.save_connection(&store, "c1").await.unwrap();

        manager.delete_connection(&store, "c1").await.unwrap();
        assert!(!manager.contains("c1").await);
        assert!(store.load_connection("c1").unwrap().is_none());

        // Deleting what is only stored, or nothing at all, is fine
        manager.delete_connection(&store, "c1").await.unwrap();
    }
}
