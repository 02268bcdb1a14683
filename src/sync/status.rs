//! Read-only status surface for the UI layer.

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of the engine's observable state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub is_online: bool,
  pub is_syncing: bool,
  pub pending_count: usize,
  /// Permanently failed tasks kept for inspection
  pub failed_count: usize,
}

/// Publishes [`SyncStatus`] changes to any number of subscribers.
pub struct StatusBoard {
  tx: watch::Sender<SyncStatus>,
}

impl StatusBoard {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(SyncStatus::default());
    Self { tx }
  }

  pub fn snapshot(&self) -> SyncStatus {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.tx.subscribe()
  }

  pub fn set_online(&self, online: bool) {
    self.update(|s| &mut s.is_online, online);
  }

  pub fn set_syncing(&self, syncing: bool) {
    self.update(|s| &mut s.is_syncing, syncing);
  }

  pub fn set_pending(&self, count: usize) {
    self.update(|s| &mut s.pending_count, count);
  }

  pub fn set_failed(&self, count: usize) {
    self.update(|s| &mut s.failed_count, count);
  }

  /// Only notifies subscribers when the field actually changes.
  fn update<T: PartialEq>(&self, field: impl Fn(&mut SyncStatus) -> &mut T, value: T) {
    self.tx.send_if_modified(|status| {
      let slot = field(status);
      if *slot == value {
        false
      } else {
        *slot = value;
        true
      }
    });
  }
}

impl Default for StatusBoard {
  fn default() -> Self {
    Self::new()
  }
}
