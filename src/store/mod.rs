//! Configuration store
//!
//! Connections and tags are persisted as property bags. The engine touches the
//! store only when configuration is loaded or saved, never from a polling
//! worker.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::params::Params;

/// Load/save contract for connection and tag configuration
pub trait ConnectionStore: Send + Sync {
    /// Parameters of one connection, if stored
    fn load_connection(&self, id: &str) -> Result<Option<Params>>;

    /// Parameters of every tag stored for a connection
    fn load_tags(&self, connection_id: &str) -> Result<Vec<Params>>;

    /// Insert or replace a connection; returns its id
    fn save_connection(&self, params: &Params) -> Result<String>;

    /// Insert or replace a tag; returns its id
    fn save_tag(&self, params: &Params) -> Result<String>;

    /// Remove a connection together with its tags
    fn delete_connection(&self, id: &str) -> Result<()>;

    fn delete_tag(&self, connection_id: &str, tag_id: &str) -> Result<()>;

    /// Ids of every stored connection
    fn connection_ids(&self) -> Result<Vec<String>>;
}
