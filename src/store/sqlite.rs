//! SQLite-backed durable store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, StoreError};

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key)
);
"#;

/// SQLite-based storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!(
          "failed to create storage directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Unavailable(format!("failed to open database at {}: {}", path.display(), e))
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    tracing::debug!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("pantry-sync").join("sync.db"))
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    self.conn()?.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::Poisoned)
  }
}

impl DurableStore for SqliteStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT INTO kv (namespace, key, value, updated_at)
       VALUES (?1, ?2, ?3, datetime('now'))
       ON CONFLICT(namespace, key) DO UPDATE SET
          value = excluded.value,
          updated_at = excluded.updated_at",
      params![namespace, key, value],
    )?;
    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute(
      "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
      params![namespace, key],
    )?;
    Ok(())
  }

  fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
    let keys = stmt
      .query_map(params![namespace], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }

  fn clear(&self, namespace: &str) -> Result<usize, StoreError> {
    let conn = self.conn()?;
    let removed = conn.execute("DELETE FROM kv WHERE namespace = ?1", params![namespace])?;
    Ok(removed)
  }
}
