//! Replays the sync queue against the server.
//!
//! A drain walks a snapshot of the queue front to back, one request at a time,
//! so mutations against the same resource reach the server in the order the
//! user made them. A failed task never blocks the tasks behind it: it is kept
//! with its attempt counter bumped and retried on the next trigger, until the
//! retry ceiling turns it into a permanent failure.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{DurableStore, StoreError};

use super::queue::SyncQueue;
use super::status::StatusBoard;
use super::task::{FailedTask, SyncTask};
use super::transport::{Transport, TransportError};

/// Store namespace for permanently failed tasks.
pub const FAILURE_NAMESPACE: &str = "sync-failures";

/// Default replay attempts before a task is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Outcome counts of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Replayed successfully and removed
  pub settled: usize,
  /// Failed this cycle, kept for the next one
  pub retrying: usize,
  /// Permanently failed and removed
  pub dropped: usize,
  /// Tasks left in the queue after the cycle
  pub pending: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
  pub max_retries: u32,
  /// Drop a task on its first 4xx rejection instead of waiting for the ceiling
  pub drop_rejected: bool,
}

impl Default for ProcessorOptions {
  fn default() -> Self {
    Self {
      max_retries: DEFAULT_MAX_RETRIES,
      drop_rejected: true,
    }
  }
}

/// Drains the [`SyncQueue`] through a [`Transport`].
pub struct QueueProcessor {
  queue: Arc<SyncQueue>,
  transport: Arc<dyn Transport>,
  store: Arc<dyn DurableStore>,
  status: Arc<StatusBoard>,
  options: ProcessorOptions,
  processing: AtomicBool,
  /// Attempt counts by task id, kept even when the store refuses the update
  attempts: Mutex<HashMap<String, u32>>,
}

impl QueueProcessor {
  pub fn new(
    queue: Arc<SyncQueue>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn DurableStore>,
    status: Arc<StatusBoard>,
    options: ProcessorOptions,
  ) -> Self {
    let processor = Self {
      queue,
      transport,
      store,
      status,
      options,
      processing: AtomicBool::new(false),
      attempts: Mutex::new(HashMap::new()),
    };
    processor.publish_failed();
    processor
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::SeqCst)
  }

  /// Run one drain cycle.
  ///
  /// Returns `None` without touching the queue when another drain is
  /// already in flight.
  pub async fn process_now(&self) -> Option<DrainReport> {
    let _guard = ProcessingGuard::acquire(&self.processing, &self.status)?;
    Some(self.drain().await)
  }

  async fn drain(&self) -> DrainReport {
    let mut report = DrainReport::default();

    let tasks = match self.queue.peek_all() {
      Ok(tasks) => tasks,
      Err(e) => {
        tracing::error!(error = %e, "cannot read sync queue, skipping drain");
        return report;
      }
    };
    if !tasks.is_empty() {
      tracing::info!(tasks = tasks.len(), "draining sync queue");
    }
    self
      .attempts()
      .retain(|id, _| tasks.iter().any(|t| &t.id == id));

    for task in tasks {
      // The queue may have been cleared while an earlier request was in flight.
      match self.queue.contains(&task.id) {
        Ok(true) => {}
        Ok(false) => {
          tracing::debug!(id = %task.id, "task left the queue during the drain, skipping");
          continue;
        }
        Err(e) => tracing::warn!(id = %task.id, error = %e, "cannot confirm task is still queued"),
      }

      match self.transport.replay(&task).await {
        Ok(status) => {
          tracing::info!(id = %task.id, method = %task.method, target = %task.target, status, "synced task");
          self.attempts().remove(&task.id);
          if let Err(e) = self.queue.remove(&task.id) {
            tracing::error!(id = %task.id, error = %e, "synced task could not be removed from the queue");
          }
          report.settled += 1;
        }
        Err(e) => self.handle_failure(task, e, &mut report),
      }
    }

    report.pending = self.queue.len();
    tracing::debug!(?report, "drain finished");
    report
  }

  fn handle_failure(&self, mut task: SyncTask, error: TransportError, report: &mut DrainReport) {
    let rejected = self.options.drop_rejected && error.is_rejection();
    let known = self.attempts().get(&task.id).copied().unwrap_or(0);
    task.attempts = task.attempts.max(known) + 1;
    task.last_error = Some(error.to_string());

    if !rejected && task.attempts < self.options.max_retries {
      tracing::warn!(
        id = %task.id,
        target = %task.target,
        attempt = task.attempts,
        max = self.options.max_retries,
        error = %error,
        "sync task failed, will retry"
      );
      match self.queue.update(&task) {
        Ok(true) => {
          self.attempts().insert(task.id.clone(), task.attempts);
          report.retrying += 1;
        }
        Ok(false) => {}
        Err(e) => {
          tracing::warn!(id = %task.id, error = %e, "StorageUnavailable: attempt count not saved");
          self.attempts().insert(task.id.clone(), task.attempts);
          report.retrying += 1;
        }
      }
      return;
    }

    let reason = if rejected {
      format!("rejected by server: {}", error)
    } else {
      format!("gave up after {} attempts: {}", task.attempts, error)
    };
    tracing::error!(id = %task.id, method = %task.method, target = %task.target, %reason, "dropping sync task");

    self.attempts().remove(&task.id);
    self.record_failure(&task, reason);
    if let Err(e) = self.queue.remove(&task.id) {
      tracing::error!(id = %task.id, error = %e, "dropped task could not be removed from the queue");
    }
    report.dropped += 1;
  }

  fn record_failure(&self, task: &SyncTask, reason: String) {
    let failed = FailedTask {
      task: task.clone(),
      reason,
      failed_at: Utc::now(),
    };
    match serde_json::to_vec(&failed) {
      Ok(data) => {
        if let Err(e) = self.store.set(FAILURE_NAMESPACE, &task.id, &data) {
          tracing::warn!(id = %task.id, error = %e, "StorageUnavailable: failure record not saved");
        }
      }
      Err(e) => tracing::error!(id = %task.id, error = %e, "failure record could not be serialized"),
    }
    self.publish_failed();
  }

  /// Permanently failed tasks, oldest failure first.
  pub fn failures(&self) -> Result<Vec<FailedTask>, StoreError> {
    let mut failures = Vec::new();
    for key in self.store.list_keys(FAILURE_NAMESPACE)? {
      if let Some(raw) = self.store.get(FAILURE_NAMESPACE, &key)? {
        match serde_json::from_slice::<FailedTask>(&raw) {
          Ok(failed) => failures.push(failed),
          Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable failure record"),
        }
      }
    }
    failures.sort_by_key(|f| (f.failed_at, f.task.sequence));
    Ok(failures)
  }

  /// Forget every recorded permanent failure.
  pub fn clear_failures(&self) -> Result<usize, StoreError> {
    let removed = self.store.clear(FAILURE_NAMESPACE)?;
    self.publish_failed();
    Ok(removed)
  }

  fn attempts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
    match self.attempts.lock() {
      Ok(attempts) => attempts,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn publish_failed(&self) {
    let count = self
      .store
      .list_keys(FAILURE_NAMESPACE)
      .map(|keys| keys.len())
      .unwrap_or(0);
    self.status.set_failed(count);
  }
}

/// Holds the processing flag for the duration of a drain.
///
/// Released on drop, so a cancelled or panicking drain cannot leave the
/// processor locked.
struct ProcessingGuard<'a> {
  flag: &'a AtomicBool,
  status: &'a StatusBoard,
}

impl<'a> ProcessingGuard<'a> {
  fn acquire(flag: &'a AtomicBool, status: &'a StatusBoard) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .ok()?;
    status.set_syncing(true);
    Some(Self { flag, status })
  }
}

impl Drop for ProcessingGuard<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::SeqCst);
    self.status.set_syncing(false);
  }
}
