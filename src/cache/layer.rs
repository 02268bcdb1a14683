//! Cache layer that serves last-known-good read models when the network fails.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::compress;
use crate::store::DurableStore;

use super::traits::{CacheEntry, CacheKey, CacheResult};

/// Store namespace holding cache entries.
pub const CACHE_NAMESPACE: &str = "offline-cache";

/// Record persisted per cache key.
#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
  stored_at: DateTime<Utc>,
  /// Output of [`compress::compress`]
  payload: String,
}

/// Offline read cache over a [`DurableStore`].
///
/// Network-first: a successful live read refreshes the snapshot, a failed one
/// falls back to it. Snapshots never expire; `stale_time` only marks them.
pub struct OfflineCache {
  store: Arc<dyn DurableStore>,
  /// How long before cached data is flagged as stale
  stale_time: Duration,
}

impl OfflineCache {
  /// Create a new cache over the given storage backend.
  pub fn new(store: Arc<dyn DurableStore>) -> Self {
    Self {
      store,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale(&self, stored_at: DateTime<Utc>) -> bool {
    Utc::now() - stored_at > self.stale_time
  }

  /// Store a snapshot, replacing any previous one for `key`.
  ///
  /// Returns `false` when the snapshot could not be written; the failure is
  /// logged and otherwise ignored.
  pub fn put<T: Serialize>(&self, key: &CacheKey, data: &T) -> bool {
    let value = match serde_json::to_value(data) {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(key = %key, error = %e, "cannot serialize cache snapshot");
        return false;
      }
    };
    self.put_value(key, &value)
  }

  fn put_value(&self, key: &CacheKey, value: &Value) -> bool {
    let payload = compress::compress(value);
    tracing::trace!(
      key = %key,
      bytes = compress::byte_size(&payload),
      ratio = compress::compression_ratio(value, &payload),
      "caching snapshot"
    );

    let snapshot = StoredSnapshot {
      stored_at: Utc::now(),
      payload,
    };
    let result = serde_json::to_vec(&snapshot)
      .map_err(|e| crate::store::StoreError::Unavailable(e.to_string()))
      .and_then(|data| self.store.set(CACHE_NAMESPACE, &key.storage_key(), &data));

    match result {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(key = %key, error = %e, "StorageUnavailable: snapshot not cached");
        false
      }
    }
  }

  /// Read the snapshot for `key`.
  ///
  /// Missing, unreadable and undecodable entries are all a miss.
  pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
    let storage_key = key.storage_key();
    let raw = match self.store.get(CACHE_NAMESPACE, &storage_key) {
      Ok(raw) => raw?,
      Err(e) => {
        tracing::warn!(key = %key, error = %e, "cache read failed");
        return None;
      }
    };

    let decoded = serde_json::from_slice::<StoredSnapshot>(&raw)
      .ok()
      .and_then(|snapshot| {
        let value = compress::decompress(&snapshot.payload)?;
        let data = serde_json::from_value::<T>(value).ok()?;
        Some((data, snapshot.stored_at))
      });

    match decoded {
      Some((data, stored_at)) => Some(CacheEntry {
        key: storage_key,
        data,
        stored_at,
        is_stale: self.is_stale(stored_at),
      }),
      None => {
        tracing::debug!(key = %key, "corrupt cache entry treated as miss");
        None
      }
    }
  }

  /// Drop the snapshot for `key`.
  pub fn remove(&self, key: &CacheKey) {
    if let Err(e) = self.store.delete(CACHE_NAMESPACE, &key.storage_key()) {
      tracing::warn!(key = %key, error = %e, "failed to remove cache entry");
    }
  }

  /// Drop every snapshot in `namespace`, with or without an id.
  pub fn invalidate_namespace(&self, namespace: &str) -> usize {
    let prefix = format!("{}:", namespace);
    let keys = match self.store.list_keys(CACHE_NAMESPACE) {
      Ok(keys) => keys,
      Err(e) => {
        tracing::warn!(namespace, error = %e, "failed to list cache entries");
        return 0;
      }
    };

    keys
      .into_iter()
      .filter(|k| k == namespace || k.starts_with(&prefix))
      .filter(|k| self.store.delete(CACHE_NAMESPACE, k).is_ok())
      .count()
  }

  /// Keys of every cached snapshot.
  pub fn keys(&self) -> Vec<String> {
    self.store.list_keys(CACHE_NAMESPACE).unwrap_or_default()
  }

  /// Wipe the whole cache.
  pub fn clear(&self) -> usize {
    match self.store.clear(CACHE_NAMESPACE) {
      Ok(removed) => {
        tracing::info!(removed, "cleared offline cache");
        removed
      }
      Err(e) => {
        tracing::warn!(error = %e, "failed to clear offline cache");
        0
      }
    }
  }

  /// Network-first read.
  ///
  /// 1. Run the fetcher
  /// 2. On success, refresh the snapshot and return live data
  /// 3. On failure, return the snapshot (offline mode)
  /// 4. With no snapshot either, return the fetch error
  pub async fn fetch<T, E, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned,
    E: std::fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    match fetcher().await {
      Ok(data) => {
        self.put(key, &data);
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match self.get::<T>(key) {
        Some(entry) => {
          tracing::debug!(key = %key, error = %e, "live read failed, serving cached snapshot");
          Ok(CacheResult::offline(entry))
        }
        None => Err(e),
      },
    }
  }
}
