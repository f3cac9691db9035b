//! SQLite configuration store
//!
//! One row per connection and one per tag. The common identity columns are
//! real columns; the full property bag is kept as JSON so every family can
//! store its own fields without a schema change.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::ConnectionStore;
use crate::error::Result;
use crate::params::Params;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a store file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        tracing::info!("Opened configuration store at {:?}", path);
        Ok(store)
    }

    /// Store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                connection_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                params TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
                id TEXT NOT NULL,
                tag_type TEXT NOT NULL,
                params TEXT NOT NULL,
                PRIMARY KEY (connection_id, id)
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionStore for SqliteStore {
    fn load_connection(&self, id: &str) -> Result<Option<Params>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT params FROM connections WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        json.as_deref().map(Params::from_json).transpose()
    }

    fn load_tags(&self, connection_id: &str) -> Result<Vec<Params>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT params FROM tags WHERE connection_id = ? ORDER BY id")?;

        let rows = stmt.query_map(params![connection_id], |row| row.get::<_, String>(0))?;

        let mut tags = Vec::new();
        for json in rows {
            tags.push(Params::from_json(&json?)?);
        }
        Ok(tags)
    }

    fn save_connection(&self, params: &Params) -> Result<String> {
        let id = params.require_str("id")?;
        let connection_type = params.require_str("connection_type")?;
        let description = params.get_str("description")?.unwrap_or_default();

        self.conn().execute(
            "INSERT INTO connections (id, connection_type, description, params)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                connection_type = excluded.connection_type,
                description = excluded.description,
                params = excluded.params",
            params![id, connection_type, description, params.to_json()?],
        )?;

        tracing::debug!(connection_id = %id, "Connection saved");
        Ok(id.to_string())
    }

    fn save_tag(&self, params: &Params) -> Result<String> {
        let id = params.require_str("id")?;
        let connection_id = params.require_str("connection_id")?;
        let tag_type = params.get_str("tag_type")?.unwrap_or_default();

        self.conn().execute(
            "INSERT OR REPLACE INTO tags (connection_id, id, tag_type, params)
             VALUES (?1, ?2, ?3, ?4)",
            params![connection_id, id, tag_type, params.to_json()?],
        )?;

        tracing::debug!(connection_id = %connection_id, tag_id = %id, "Tag saved");
        Ok(id.to_string())
    }

    fn delete_connection(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM tags WHERE connection_id = ?", params![id])?;
        conn.execute("DELETE FROM connections WHERE id = ?", params![id])?;
        Ok(())
    }

    fn delete_tag(&self, connection_id: &str, tag_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM tags WHERE connection_id = ? AND id = ?",
            params![connection_id, tag_id],
        )?;
        Ok(())
    }

    fn connection_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT id FROM connections ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessLinkError;
    use tempfile::TempDir;

    fn connection(id: &str) -> Params {
        Params::new()
            .with("id", id)
            .with("connection_type", "logix")
            .with("host", "10.0.0.5")
            .with("port", 44818)
    }

    fn tag(connection_id: &str, id: &str) -> Params {
        Params::new()
            .with("id", id)
            .with("connection_id", connection_id)
            .with("tag_type", "logix")
            .with("address", "Program:Main.Counter")
    }

    #[test]
    fn test_save_and_load_connection() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.load_connection("plc1").unwrap(), None);
        assert_eq!(store.save_connection(&connection("plc1")).unwrap(), "plc1");

        let loaded = store.load_connection("plc1").unwrap().unwrap();
        assert_eq!(loaded, connection("plc1"));

        // Saving again updates in place
        store
            .save_connection(&connection("plc1").with("description", "line 2"))
            .unwrap();
        let loaded = store.load_connection("plc1").unwrap().unwrap();
        assert_eq!(loaded.get_str("description").unwrap(), Some("line 2"));
        assert_eq!(store.connection_ids().unwrap(), vec!["plc1"]);
    }

    #[test]
    fn test_save_requires_identity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .save_connection(&Params::new().with("id", "c1"))
            .unwrap_err();
        assert!(matches!(err, ProcessLinkError::MissingProperty(_)));
    }

    #[test]
    fn test_tags_follow_connection() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_connection(&connection("plc1")).unwrap();
        store.save_tag(&tag("plc1", "t2")).unwrap();
        store.save_tag(&tag("plc1", "t1")).unwrap();

        let tags = store.load_tags("plc1").unwrap();
        let ids: Vec<_> = tags.iter().map(|t| t.require_str("id").unwrap()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        store.delete_tag("plc1", "t2").unwrap();
        assert_eq!(store.load_tags("plc1").unwrap().len(), 1);

        store.delete_connection("plc1").unwrap();
        assert!(store.load_connection("plc1").unwrap().is_none());
        assert!(store.load_tags("plc1").unwrap().is_empty());
    }

    #[test]
    fn test_tag_without_connection_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.save_tag(&tag("ghost", "t1")).unwrap_err();
        assert!(matches!(err, ProcessLinkError::Storage(_)));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_connection(&connection("plc1")).unwrap();
            store.save_tag(&tag("plc1", "t1")).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(store.load_connection("plc1").unwrap().is_some());
        assert_eq!(store.load_tags("plc1").unwrap().len(), 1);
    }
}
