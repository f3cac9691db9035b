//! # process-link
//!
//! Polling engine for industrial process data. Device connections read a
//! chosen set of tags on a fixed pollrate and hand each cycle's values to a
//! sink as one batch.
//!
//! ## Features
//!
//! - **Background polling**: one tokio task per connection, started and stopped
//!   by changes to its polled-tag set
//! - **Consistent batches**: a cycle never observes a half-applied tag-set change
//! - **Pluggable families**: device types register constructors by name
//! - **Persistence**: connection and tag definitions stored in SQLite
//!
//! ## Modules
//!
//! - [`connection`]: a device link, its tags and its polling worker
//! - [`manager`]: owner of all connections, fault handling and status
//! - [`registry`]: connection and tag constructors keyed by type name
//! - [`families`]: the built-in `local` and `logix` families
//! - [`store`]: configuration persistence
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use process_link::*;
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
//!
//!     manager
//!         .add_connection(
//!             Params::new()
//!                 .with("id", "c1")
//!                 .with("connection_type", "local")
//!                 .with("pollrate", 0.5),
//!         )
//!         .await?;
//!     manager.attach_tag("c1", Params::new().with("id", "t1")).await?;
//!     manager.update_polled_tags("c1", &["t1"]).await?;
//!
//!     if let Some(batch) = batches.recv().await {
//!         println!("{}: {:?}", batch.connection_id, batch.samples);
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod families;
pub mod manager;
pub mod params;
pub mod registry;
pub mod sink;
pub mod store;
pub mod tag;

// Re-export top-level types for convenience
pub use adapter::{AdapterError, ProtocolAdapter};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

pub use connection::{
    Connection, ConnectionContext, ConnectionFault, ConnectionSettings, ConnectionStatus,
    FaultKind, PollingSummary,
};

pub use error::{ProcessLinkError, Result, UnknownType};

pub use families::{LocalAdapter, LocalTag, LogixSettings, LogixTag};

pub use manager::{ConnectionManager, ManagerConfig};

pub use params::Params;

pub use registry::{ConnectionFamily, ConnectionParts, ConnectionRegistry};

pub use sink::{Batch, ChannelSink, Sample, SampleValue, UpdateSink};

pub use store::{ConnectionStore, SqliteStore};

pub use tag::{Tag, TagInfo, TagValue};
