//! In-memory store for ephemeral runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, StoreError};

type Namespaces = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Storage implementation that keeps everything in process memory.
///
/// Nothing survives a restart. Writes can be switched off to emulate a full
/// storage medium.
#[derive(Default)]
pub struct MemoryStore {
  data: Mutex<Namespaces>,
  reject_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent `set` fail with [`StoreError::Unavailable`].
  pub fn set_full(&self, full: bool) {
    self.reject_writes.store(full, Ordering::SeqCst);
  }

  fn data(&self) -> Result<MutexGuard<'_, Namespaces>, StoreError> {
    self.data.lock().map_err(|_| StoreError::Poisoned)
  }
}

impl DurableStore for MemoryStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(
      self
        .data()?
        .get(namespace)
        .and_then(|ns| ns.get(key))
        .cloned(),
    )
  }

  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
    if self.reject_writes.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("storage quota exceeded".into()));
    }
    self
      .data()?
      .entry(namespace.to_string())
      .or_default()
      .insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
    if let Some(ns) = self.data()?.get_mut(namespace) {
      ns.remove(key);
    }
    Ok(())
  }

  fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
    Ok(
      self
        .data()?
        .get(namespace)
        .map(|ns| ns.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_full_store_rejects_writes_but_serves_reads() {
    let store = MemoryStore::new();
    store.set("ns", "a", b"1").unwrap();

    store.set_full(true);
    assert!(matches!(
      store.set("ns", "b", b"2"),
      Err(StoreError::Unavailable(_))
    ));
    assert_eq!(store.get("ns", "a").unwrap(), Some(b"1".to_vec()));

    store.set_full(false);
    store.set("ns", "b", b"2").unwrap();
    assert_eq!(store.list_keys("ns").unwrap(), vec!["a", "b"]);
  }

  #[test]
  fn test_default_clear_removes_namespace_only() {
    let store = MemoryStore::new();
    store.set("ns", "a", b"1").unwrap();
    store.set("ns", "b", b"2").unwrap();
    store.set("other", "a", b"3").unwrap();

    assert_eq!(store.clear("ns").unwrap(), 2);
    assert!(store.list_keys("ns").unwrap().is_empty());
    assert_eq!(store.list_keys("other").unwrap(), vec!["a"]);
  }
}
