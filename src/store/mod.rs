//! Durable key-value storage shared by the offline cache and the sync queue.
//!
//! Keys live in namespaces so independent consumers never see each other's
//! records. Writes are last-write-wins per key; there is no multi-key
//! transaction.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The storage medium is full, missing or refused the operation.
  #[error("storage unavailable: {0}")]
  Unavailable(String),

  /// A previous panic left the backend lock poisoned.
  #[error("storage lock poisoned")]
  Poisoned,
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Unavailable(e.to_string())
  }
}

/// Trait for durable storage backends.
pub trait DurableStore: Send + Sync {
  /// Read the value stored under `key`, if any.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

  /// Delete `key`. Deleting a missing key is not an error.
  fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

  /// Snapshot of every key in `namespace`, sorted.
  fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError>;

  /// Delete every key in `namespace`. Returns how many were removed.
  fn clear(&self, namespace: &str) -> Result<usize, StoreError> {
    let keys = self.list_keys(namespace)?;
    for key in &keys {
      self.delete(namespace, key)?;
    }
    Ok(keys.len())
  }
}
