//! Connectivity state machine and the drain triggers it owns.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::processor::QueueProcessor;
use super::status::StatusBoard;
use super::transport::Transport;

/// Default interval of the periodic drain while online.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
  Offline,
  Online,
}

struct Inner {
  tx: watch::Sender<Connectivity>,
  status: Arc<StatusBoard>,
}

/// Tracks OFFLINE/ONLINE transitions reported by the platform.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  inner: Arc<Inner>,
}

impl ConnectivityMonitor {
  pub fn new(initial: Connectivity, status: Arc<StatusBoard>) -> Self {
    let (tx, _rx) = watch::channel(initial);
    status.set_online(initial == Connectivity::Online);
    Self {
      inner: Arc::new(Inner { tx, status }),
    }
  }

  pub fn current(&self) -> Connectivity {
    *self.inner.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current() == Connectivity::Online
  }

  pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
    self.inner.tx.subscribe()
  }

  /// Feed a connectivity signal. Returns whether the state changed.
  pub fn report(&self, state: Connectivity) -> bool {
    let changed = self.inner.tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        *current = state;
        true
      }
    });
    if changed {
      tracing::info!(?state, "connectivity changed");
      self.inner.status.set_online(state == Connectivity::Online);
    }
    changed
  }

  /// Start draining `processor` on every OFFLINE -> ONLINE transition and on
  /// every `tick` spent online.
  pub fn spawn(&self, processor: Arc<QueueProcessor>, tick: Duration) -> MonitorHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run_monitor(self.subscribe(), processor, tick, shutdown_rx));
    MonitorHandle::new(shutdown_tx, task)
  }

  /// Poll `transport` for reachability every `every` and report the result.
  ///
  /// Stands in for platform connectivity events where none exist.
  pub fn spawn_probe(&self, transport: Arc<dyn Transport>, every: Duration) -> MonitorHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run_probe(self.clone(), transport, every, shutdown_rx));
    MonitorHandle::new(shutdown_tx, task)
  }
}

async fn run_monitor(
  mut state: watch::Receiver<Connectivity>,
  processor: Arc<QueueProcessor>,
  tick: Duration,
  mut shutdown: oneshot::Receiver<()>,
) {
  let mut ticker = time::interval_at(Instant::now() + tick, tick);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut online = *state.borrow_and_update() == Connectivity::Online;

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      changed = state.changed() => {
        if changed.is_err() {
          break;
        }
        let now_online = *state.borrow_and_update() == Connectivity::Online;
        if now_online && !online {
          tracing::debug!("back online, triggering drain");
          ticker.reset();
          spawn_drain(&processor);
        }
        online = now_online;
      }
      _ = ticker.tick() => {
        if online {
          tracing::debug!("periodic drain");
          spawn_drain(&processor);
        }
      }
    }
  }
  tracing::debug!("connectivity monitor stopped");
}

/// Drains run detached so shutdown is never held up by a slow request. The
/// processor's own flag keeps them from overlapping.
fn spawn_drain(processor: &Arc<QueueProcessor>) {
  let processor = Arc::clone(processor);
  tokio::spawn(async move {
    if let Some(report) = processor.process_now().await {
      if report.settled + report.dropped > 0 {
        tracing::info!(
          settled = report.settled,
          dropped = report.dropped,
          pending = report.pending,
          "sync cycle finished"
        );
      }
    }
  });
}

async fn run_probe(
  monitor: ConnectivityMonitor,
  transport: Arc<dyn Transport>,
  every: Duration,
  mut shutdown: oneshot::Receiver<()>,
) {
  let mut ticker = time::interval(every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      _ = ticker.tick() => {
        let state = if transport.probe().await {
          Connectivity::Online
        } else {
          Connectivity::Offline
        };
        monitor.report(state);
      }
    }
  }
}

/// Cancellation handle for a spawned monitor task.
///
/// Dropping the handle aborts the task.
pub struct MonitorHandle {
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
  fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
    Self {
      shutdown: Some(shutdown),
      task: Some(task),
    }
  }

  /// Stop the task and wait for it to exit.
  pub async fn shutdown(mut self) {
    if let Some(tx) = self.shutdown.take() {
      let _ = tx.send(());
    }
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }

  pub fn is_finished(&self) -> bool {
    self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
  }
}

impl Drop for MonitorHandle {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}
