//! SQLite-backed durable store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::DurableStore;
use crate::error::PersistenceError;

/// Schema for the key-value table.
///
/// `seq` is the insertion order; upserts keep the original row so a task
/// whose attempt counter is bumped does not move in the queue.
const SCHEMA: &str = r#"
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS kv (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_namespace ON kv(namespace, seq);
"#;

/// SQLite durable store. One connection behind a mutex.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self, PersistenceError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    info!(path = %path.display(), "Opened durable store");
    Self::with_connection(conn)
  }

  /// Open the store inside `data_dir` (`<data_dir>/fieldsync.db`).
  pub fn open_in_dir(data_dir: &Path) -> Result<Self, PersistenceError> {
    Self::open(&Self::db_path(data_dir))
  }

  /// Volatile store, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self, PersistenceError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Path of the database file inside a data directory.
  pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("fieldsync.db")
  }

  fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
    self
      .conn
      .lock()
      .map_err(|e| PersistenceError::Poisoned(e.to_string()))
  }
}

impl DurableStore for SqliteStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
       ON CONFLICT(namespace, key)
       DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
      params![namespace, key, value],
    )?;
    debug!(namespace, key, bytes = value.len(), "Persisted value");
    Ok(())
  }

  fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key, value FROM kv WHERE namespace = ?1 ORDER BY seq")?;
    let rows = stmt
      .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  }

  fn list_prefix(
    &self,
    namespace: &str,
    prefix: &str,
  ) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT key, value FROM kv
       WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2
       ORDER BY seq",
    )?;
    let rows = stmt
      .query_map(params![namespace, prefix], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
    let conn = self.lock()?;
    conn.execute(
      "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
      params![namespace, key],
    )?;
    debug!(namespace, key, "Removed value");
    Ok(())
  }
}
