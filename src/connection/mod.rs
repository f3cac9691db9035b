//! Connections
//!
//! - **settings**: attributes shared by every device family
//! - **handle**: the `Connection` itself: tags, polled-tag set, start/stop
//! - **worker**: the background polling loop
//! - **status**: faults, counters and status snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use process_link::connection::{Connection, ConnectionContext};
//! use process_link::params::Params;
//! use process_link::registry::ConnectionRegistry;
//! use process_link::sink::ChannelSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, mut batches) = ChannelSink::new();
//!     let registry = ConnectionRegistry::with_builtin();
//!
//!     let conn = Connection::create(
//!         &registry,
//!         &Params::new().with("id", "c1").with("connection_type", "local"),
//!         ConnectionContext::new(Arc::new(sink)),
//!     )?;
//!     conn.new_tag(Params::new().with("id", "t1").with("value", 7)).await?;
//!
//!     // Starts the worker because the set is non-empty
//!     conn.update_polled_tags(&["t1"]).await?;
//!     let batch = batches.recv().await.unwrap();
//!     println!("{:?}", batch.samples["t1"]);
//!
//!     conn.stop(std::time::Duration::from_secs(1)).await?;
//!     Ok(())
//! }
//! ```

mod handle;
mod settings;
mod status;
mod worker;

pub use handle::{Connection, ConnectionContext, DEFAULT_LOCK_TIMEOUT};
pub use settings::ConnectionSettings;
pub use status::{ConnectionFault, ConnectionStatus, FaultKind, PollingSummary};

