//! Background drain registration.
//!
//! Callers never probe for platform support themselves: they hold an
//! `Arc<dyn BackgroundScheduler>` chosen once at startup and treat a `false`
//! from [`BackgroundScheduler::register`] as "foreground triggers only".

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::monitor::Connectivity;
use super::processor::QueueProcessor;

/// Capability that can wake the queue processor outside the foreground flow.
pub trait BackgroundScheduler: Send + Sync {
  /// Arm background draining. Returns `false` when the capability is not
  /// available. Registering twice is a no-op.
  fn register(&self) -> bool;

  /// Disarm background draining.
  fn unregister(&self);

  fn is_registered(&self) -> bool;

  fn name(&self) -> &'static str;
}

/// Scheduler for platforms without a background capability.
pub struct NoopScheduler;

impl BackgroundScheduler for NoopScheduler {
  fn register(&self) -> bool {
    false
  }

  fn unregister(&self) {}

  fn is_registered(&self) -> bool {
    false
  }

  fn name(&self) -> &'static str {
    "none"
  }
}

/// Drains from a detached task on the ambient tokio runtime.
///
/// The task outlives whatever UI or command started it and keeps draining
/// every `interval` while the device is online.
pub struct RuntimeScheduler {
  processor: Arc<QueueProcessor>,
  connectivity: watch::Receiver<Connectivity>,
  interval: Duration,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeScheduler {
  pub fn new(
    processor: Arc<QueueProcessor>,
    connectivity: watch::Receiver<Connectivity>,
    interval: Duration,
  ) -> Self {
    Self {
      processor,
      connectivity,
      interval,
      task: Mutex::new(None),
    }
  }
}

impl BackgroundScheduler for RuntimeScheduler {
  fn register(&self) -> bool {
    let Ok(mut task) = self.task.lock() else {
      return false;
    };
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
      return true;
    }

    let Ok(runtime) = Handle::try_current() else {
      tracing::info!("no async runtime available, background sync disabled");
      return false;
    };

    let processor = Arc::clone(&self.processor);
    let connectivity = self.connectivity.clone();
    let interval = self.interval;
    *task = Some(runtime.spawn(async move {
      let mut ticker = time::interval_at(Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if *connectivity.borrow() != Connectivity::Online {
          continue;
        }
        if let Some(report) = processor.process_now().await {
          tracing::debug!(?report, "background sync cycle");
        }
      }
    }));

    tracing::info!(interval_secs = interval.as_secs(), "background sync registered");
    true
  }

  fn unregister(&self) {
    if let Ok(mut task) = self.task.lock() {
      if let Some(task) = task.take() {
        task.abort();
        tracing::info!("background sync unregistered");
      }
    }
  }

  fn is_registered(&self) -> bool {
    self
      .task
      .lock()
      .map(|t| t.as_ref().is_some_and(|t| !t.is_finished()))
      .unwrap_or(false)
  }

  fn name(&self) -> &'static str {
    "runtime"
  }
}

impl Drop for RuntimeScheduler {
  fn drop(&mut self) {
    self.unregister();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::sync::monitor::ConnectivityMonitor;
  use crate::sync::processor::ProcessorOptions;
  use crate::sync::queue::SyncQueue;
  use crate::sync::status::StatusBoard;
  use crate::sync::task::Method;
  use crate::sync::transport::testing::ScriptedTransport;
  use serde_json::json;

  fn setup(
    initial: Connectivity,
  ) -> (
    Arc<SyncQueue>,
    Arc<ScriptedTransport>,
    Arc<QueueProcessor>,
    ConnectivityMonitor,
  ) {
    let store = Arc::new(MemoryStore::new());
    let status = Arc::new(StatusBoard::new());
    let queue = Arc::new(SyncQueue::new(store.clone(), status.clone()));
    let transport = Arc::new(ScriptedTransport::new());
    let processor = Arc::new(QueueProcessor::new(
      queue.clone(),
      transport.clone(),
      store,
      status.clone(),
      ProcessorOptions::default(),
    ));
    let monitor = ConnectivityMonitor::new(initial, status);
    (queue, transport, processor, monitor)
  }

  #[test]
  fn test_noop_scheduler_degrades_gracefully() {
    let scheduler = NoopScheduler;
    assert!(!scheduler.register());
    assert!(!scheduler.is_registered());
  }

  #[test]
  fn test_runtime_scheduler_without_runtime_is_unsupported() {
    let (_, _, processor, monitor) = setup(Connectivity::Online);
    let scheduler = RuntimeScheduler::new(processor, monitor.subscribe(), Duration::from_secs(1));
    assert!(!scheduler.register());
    assert!(!scheduler.is_registered());
  }

  #[tokio::test]
  async fn test_register_is_idempotent() {
    let (_, _, processor, monitor) = setup(Connectivity::Online);
    let scheduler = RuntimeScheduler::new(processor, monitor.subscribe(), Duration::from_secs(60));

    assert!(scheduler.register());
    assert!(scheduler.register());
    assert!(scheduler.is_registered());

    scheduler.unregister();
    assert!(!scheduler.is_registered());
  }

  #[tokio::test]
  async fn test_background_task_drains_while_online() {
    let (queue, transport, processor, monitor) = setup(Connectivity::Online);
    let scheduler =
      RuntimeScheduler::new(processor, monitor.subscribe(), Duration::from_millis(10));
    queue.enqueue(Method::Post, "api/purchases", json!({"total": 3.2}));

    assert!(scheduler.register());
    for _ in 0..100 {
      if queue.is_empty() {
        break;
      }
      time::sleep(Duration::from_millis(10)).await;
    }

    assert!(queue.is_empty());
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_background_task_waits_while_offline() {
    let (queue, transport, processor, monitor) = setup(Connectivity::Offline);
    let scheduler =
      RuntimeScheduler::new(processor, monitor.subscribe(), Duration::from_millis(10));
    queue.enqueue(Method::Post, "api/purchases", json!({}));

    assert!(scheduler.register());
    time::sleep(Duration::from_millis(60)).await;

    assert_eq!(queue.len(), 1);
    assert_eq!(transport.call_count(), 0);
  }
}
