//! Durable FIFO of pending mutations.

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::{DurableStore, StoreError};

use super::status::StatusBoard;
use super::task::{Method, SyncTask};

/// Store namespace holding queued tasks, one record per task id.
pub const QUEUE_NAMESPACE: &str = "sync-queue";

/// Ordered, durable collection of pending mutation tasks.
///
/// Every write reaches the store before the call returns, so a task handed
/// back by [`SyncQueue::try_enqueue`] survives a crash right after.
pub struct SyncQueue {
  store: Arc<dyn DurableStore>,
  status: Arc<StatusBoard>,
  next_sequence: AtomicU64,
}

impl SyncQueue {
  /// Open the queue over `store`, resuming the insertion counter after any
  /// tasks left over from a previous run.
  pub fn new(store: Arc<dyn DurableStore>, status: Arc<StatusBoard>) -> Self {
    let queue = Self {
      store,
      status,
      next_sequence: AtomicU64::new(1),
    };

    match queue.peek_all() {
      Ok(tasks) => {
        let next = tasks.last().map(|t| t.sequence + 1).unwrap_or(1);
        queue.next_sequence.store(next, Ordering::SeqCst);
        if !tasks.is_empty() {
          tracing::info!(pending = tasks.len(), "resumed sync queue");
        }
      }
      Err(e) => {
        // Surviving tasks may hold any sequence; restart above all of them.
        let seed = Utc::now().timestamp_micros().max(1) as u64;
        queue.next_sequence.store(seed, Ordering::SeqCst);
        tracing::warn!(error = %e, seed, "could not read sync queue on startup");
      }
    }
    queue.publish_pending();
    queue
  }

  /// Queue a mutation, reporting whether it reached durable storage.
  pub fn try_enqueue(
    &self,
    method: Method,
    target: impl Into<String>,
    payload: Value,
  ) -> Result<SyncTask, (SyncTask, StoreError)> {
    let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
    let task = SyncTask::new(sequence, method, target.into(), payload);

    if let Err(e) = self.persist(&task) {
      return Err((task, e));
    }
    tracing::debug!(id = %task.id, method = %task.method, target = %task.target, "enqueued sync task");
    self.publish_pending();
    Ok(task)
  }

  /// Queue a mutation.
  ///
  /// Storage failures are logged and swallowed: the caller still gets the
  /// task back, but it carries no offline guarantee.
  pub fn enqueue(&self, method: Method, target: impl Into<String>, payload: Value) -> SyncTask {
    match self.try_enqueue(method, target, payload) {
      Ok(task) => task,
      Err((task, e)) => {
        tracing::warn!(
          id = %task.id,
          target = %task.target,
          error = %e,
          "StorageUnavailable: task not persisted, it will be lost if the app closes offline"
        );
        task
      }
    }
  }

  /// All queued tasks in insertion order.
  ///
  /// Records that can no longer be decoded are deleted, since no drain could
  /// ever replay them.
  pub fn peek_all(&self) -> Result<Vec<SyncTask>, StoreError> {
    let mut tasks = Vec::new();
    let mut discarded = 0;
    for key in self.store.list_keys(QUEUE_NAMESPACE)? {
      let Some(raw) = self.store.get(QUEUE_NAMESPACE, &key)? else {
        continue;
      };
      match serde_json::from_slice::<SyncTask>(&raw) {
        Ok(task) => tasks.push(task),
        Err(e) => {
          tracing::error!(key = %key, error = %e, "discarding unreadable sync task");
          match self.store.delete(QUEUE_NAMESPACE, &key) {
            Ok(()) => discarded += 1,
            Err(e) => tracing::warn!(key = %key, error = %e, "unreadable sync task could not be deleted"),
          }
        }
      }
    }
    if discarded > 0 {
      self.publish_pending();
    }
    tasks.sort_by_key(|t| (t.sequence, t.enqueued_at));
    Ok(tasks)
  }

  /// Whether `id` is still queued.
  pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
    Ok(self.store.get(QUEUE_NAMESPACE, id)?.is_some())
  }

  /// Persist a task whose attempt counter changed.
  ///
  /// Tasks that were removed in the meantime (for instance by [`SyncQueue::clear`]
  /// during a drain) are not brought back.
  pub fn update(&self, task: &SyncTask) -> Result<bool, StoreError> {
    if !self.contains(&task.id)? {
      return Ok(false);
    }
    self.persist(task)?;
    Ok(true)
  }

  /// Remove a task. Removing an unknown id is a no-op.
  pub fn remove(&self, id: &str) -> Result<(), StoreError> {
    self.store.delete(QUEUE_NAMESPACE, id)?;
    self.publish_pending();
    Ok(())
  }

  /// Drop every queued task.
  pub fn clear(&self) -> Result<usize, StoreError> {
    let removed = self.store.clear(QUEUE_NAMESPACE)?;
    self.publish_pending();
    tracing::info!(removed, "cleared sync queue");
    Ok(removed)
  }

  /// Number of queued tasks; zero when the store cannot be read.
  pub fn len(&self) -> usize {
    self
      .store
      .list_keys(QUEUE_NAMESPACE)
      .map(|keys| keys.len())
      .unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn persist(&self, task: &SyncTask) -> Result<(), StoreError> {
    let data = serde_json::to_vec(task)
      .map_err(|e| StoreError::Unavailable(format!("failed to serialize task: {}", e)))?;
    self.store.set(QUEUE_NAMESPACE, &task.id, &data)
  }

  fn publish_pending(&self) {
    self.status.set_pending(self.len());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, SqliteStore};
  use serde_json::json;
  use std::sync::atomic::AtomicBool;

  fn memory_queue() -> (Arc<MemoryStore>, Arc<StatusBoard>, SyncQueue) {
    let store = Arc::new(MemoryStore::new());
    let status = Arc::new(StatusBoard::new());
    let queue = SyncQueue::new(store.clone(), status.clone());
    (store, status, queue)
  }

  #[test]
  fn test_enqueue_starts_with_zero_attempts() {
    let (_, status, queue) = memory_queue();
    let task = queue.enqueue(Method::Post, "api/products", json!({"name": "Oats"}));

    assert_eq!(task.attempts, 0);
    assert_eq!(queue.peek_all().unwrap(), vec![task]);
    assert_eq!(status.snapshot().pending_count, 1);
  }

  #[test]
  fn test_peek_all_preserves_insertion_order() {
    let (_, _, queue) = memory_queue();
    let ids: Vec<String> = (0..20)
      .map(|i| {
        queue
          .enqueue(Method::Patch, "api/shopping-lists/1/items/9", json!({ "qty": i }))
          .id
      })
      .collect();

    let queued: Vec<String> = queue.peek_all().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(queued, ids);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let (_, status, queue) = memory_queue();
    let task = queue.enqueue(Method::Delete, "api/stock/4", Value::Null);

    queue.remove(&task.id).unwrap();
    queue.remove(&task.id).unwrap();
    queue.remove("never-existed").unwrap();

    assert!(queue.is_empty());
    assert_eq!(status.snapshot().pending_count, 0);
  }

  #[test]
  fn test_update_does_not_resurrect_removed_task() {
    let (_, _, queue) = memory_queue();
    let mut task = queue.enqueue(Method::Put, "api/stock/4", json!({"qty": 1}));
    queue.clear().unwrap();

    task.attempts = 1;
    assert!(!queue.update(&task).unwrap());
    assert!(queue.is_empty());
  }

  #[test]
  fn test_clear_removes_everything() {
    let (_, _, queue) = memory_queue();
    for _ in 0..3 {
      queue.enqueue(Method::Post, "api/purchases", json!({}));
    }
    assert_eq!(queue.clear().unwrap(), 3);
    assert!(queue.peek_all().unwrap().is_empty());
  }

  #[test]
  fn test_enqueue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");

    let first = {
      let store = Arc::new(SqliteStore::open(&path).unwrap());
      let queue = SyncQueue::new(store, Arc::new(StatusBoard::new()));
      queue.enqueue(Method::Post, "api/shopping-lists/2/items", json!({"name": "Eggs"}))
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let status = Arc::new(StatusBoard::new());
    let queue = SyncQueue::new(store, status.clone());
    assert_eq!(queue.peek_all().unwrap(), vec![first.clone()]);
    assert_eq!(status.snapshot().pending_count, 1);

    // The counter resumes after the surviving task.
    let second = queue.enqueue(Method::Post, "api/shopping-lists/2/items", json!({"name": "Milk"}));
    assert!(second.sequence > first.sequence);
  }

  #[test]
  fn test_storage_failure_still_returns_task() {
    let (store, status, queue) = memory_queue();
    store.set_full(true);

    let task = queue.enqueue(Method::Patch, "api/shopping-lists/1/items/3", json!({"checked": true}));
    assert_eq!(task.attempts, 0);
    assert_eq!(task.target, "api/shopping-lists/1/items/3");
    assert!(queue.is_empty());
    assert_eq!(status.snapshot().pending_count, 0);

    assert!(matches!(
      queue.try_enqueue(Method::Post, "api/products", json!({})),
      Err((_, StoreError::Unavailable(_)))
    ));
  }

  #[test]
  fn test_unreadable_records_are_discarded() {
    let (store, status, queue) = memory_queue();
    store.set(QUEUE_NAMESPACE, "garbage", b"{not json").unwrap();
    let task = queue.enqueue(Method::Post, "api/products", json!({}));
    assert_eq!(status.snapshot().pending_count, 2);

    assert_eq!(queue.peek_all().unwrap(), vec![task.clone()]);
    assert_eq!(queue.len(), 1);
    assert_eq!(status.snapshot().pending_count, 1);
    assert_eq!(store.get(QUEUE_NAMESPACE, "garbage").unwrap(), None);

    queue.remove(&task.id).unwrap();
    assert!(queue.is_empty());
    assert_eq!(status.snapshot().pending_count, 0);
  }

  #[test]
  fn test_contains_tracks_removal() {
    let (_, _, queue) = memory_queue();
    let task = queue.enqueue(Method::Post, "api/purchases", json!({}));
    assert!(queue.contains(&task.id).unwrap());

    queue.clear().unwrap();
    assert!(!queue.contains(&task.id).unwrap());
  }

  /// Memory store whose reads fail while `unreadable` is set.
  #[derive(Default)]
  struct UnreadableStore {
    inner: MemoryStore,
    unreadable: AtomicBool,
  }

  impl DurableStore for UnreadableStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
      if self.unreadable.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("read failed".into()));
      }
      self.inner.get(namespace, key)
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
      self.inner.set(namespace, key, value)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
      self.inner.delete(namespace, key)
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
      if self.unreadable.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("read failed".into()));
      }
      self.inner.list_keys(namespace)
    }
  }

  #[test]
  fn test_unreadable_startup_does_not_reuse_sequences() {
    let store = Arc::new(UnreadableStore::default());
    let survivors: Vec<SyncTask> = {
      let queue = SyncQueue::new(store.clone(), Arc::new(StatusBoard::new()));
      (0..3)
        .map(|i| queue.enqueue(Method::Post, "api/purchases", json!({ "n": i })))
        .collect()
    };

    store.unreadable.store(true, Ordering::SeqCst);
    let queue = SyncQueue::new(store.clone(), Arc::new(StatusBoard::new()));
    store.unreadable.store(false, Ordering::SeqCst);

    let later = queue.enqueue(Method::Post, "api/purchases", json!({ "n": 3 }));
    assert!(survivors.iter().all(|t| t.sequence < later.sequence));

    let mut expected = survivors;
    expected.push(later);
    assert_eq!(queue.peek_all().unwrap(), expected);
  }
}
