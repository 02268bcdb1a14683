//! The sync engine service object.
//!
//! Built once at startup with its storage and network dependencies injected,
//! then handed by reference to whatever needs to enqueue mutations, read
//! cached data or show sync status.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::cache::{CacheKey, CacheResult, OfflineCache};
use crate::config::Config;
use crate::store::{DurableStore, MemoryStore, SqliteStore, StoreError};
use crate::sync::{
  BackgroundScheduler, Connectivity, ConnectivityMonitor, DrainReport, FailedTask, HttpTransport,
  Method, MonitorHandle, NoopScheduler, ProcessorOptions, QueueProcessor, RuntimeScheduler,
  StatusBoard, SyncQueue, SyncStatus, SyncTask, Transport, TransportError,
};

pub struct SyncEngine {
  config: Config,
  status: Arc<StatusBoard>,
  queue: Arc<SyncQueue>,
  cache: OfflineCache,
  processor: Arc<QueueProcessor>,
  monitor: ConnectivityMonitor,
  scheduler: Arc<dyn BackgroundScheduler>,
  transport: Arc<dyn Transport>,
  /// Monitor and probe tasks started by `init`
  handles: Mutex<Vec<MonitorHandle>>,
}

impl SyncEngine {
  /// Assemble the engine. Nothing runs until [`SyncEngine::init`].
  pub fn new(config: Config, store: Arc<dyn DurableStore>, transport: Arc<dyn Transport>) -> Self {
    let status = Arc::new(StatusBoard::new());
    let queue = Arc::new(SyncQueue::new(store.clone(), status.clone()));
    let cache = OfflineCache::new(store.clone())
      .with_stale_time(chrono::Duration::seconds(config.cache.stale_secs as i64));
    let processor = Arc::new(QueueProcessor::new(
      queue.clone(),
      transport.clone(),
      store,
      status.clone(),
      ProcessorOptions {
        max_retries: config.sync.max_retries,
        drop_rejected: config.sync.drop_rejected,
      },
    ));
    let monitor = ConnectivityMonitor::new(Connectivity::Offline, status.clone());

    let scheduler: Arc<dyn BackgroundScheduler> = if config.sync.background {
      Arc::new(RuntimeScheduler::new(
        processor.clone(),
        monitor.subscribe(),
        config.sync.background_interval(),
      ))
    } else {
      Arc::new(NoopScheduler)
    };

    Self {
      config,
      status,
      queue,
      cache,
      processor,
      monitor,
      scheduler,
      transport,
      handles: Mutex::new(Vec::new()),
    }
  }

  /// Open the engine from configuration: SQLite storage (or memory when
  /// `ephemeral`) and the HTTP transport.
  pub fn open(config: Config, ephemeral: bool) -> Result<Self> {
    let store: Arc<dyn DurableStore> = if ephemeral {
      Arc::new(MemoryStore::new())
    } else {
      let store = match &config.storage.path {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::open_default()?,
      };
      Arc::new(store)
    };
    let transport = HttpTransport::from_config(&config)
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::new(config, store, Arc::new(transport)))
  }

  /// Start the connectivity monitor, optionally the reachability probe, and
  /// the background scheduler.
  ///
  /// Returns whether background draining could be registered.
  pub fn init(&self, probe: bool) -> bool {
    let mut handles = match self.handles.lock() {
      Ok(handles) => handles,
      Err(poisoned) => poisoned.into_inner(),
    };
    if handles.is_empty() {
      handles.push(
        self
          .monitor
          .spawn(self.processor.clone(), self.config.sync.tick_interval()),
      );
      if probe {
        handles.push(
          self
            .monitor
            .spawn_probe(self.transport.clone(), self.config.sync.probe_interval()),
        );
      }
    }
    drop(handles);

    let registered = self.scheduler.register();
    if !registered {
      tracing::info!(
        scheduler = self.scheduler.name(),
        "background sync unavailable, relying on foreground triggers"
      );
    }
    registered
  }

  /// Stop every task started by [`SyncEngine::init`].
  pub async fn teardown(&self) {
    let handles = match self.handles.lock() {
      Ok(mut handles) => std::mem::take(&mut *handles),
      Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for handle in handles {
      handle.shutdown().await;
    }
    self.scheduler.unregister();
    tracing::debug!("sync engine stopped");
  }

  /// Record a mutation for replay. Never touches the network.
  pub fn enqueue(&self, method: Method, target: impl Into<String>, payload: Value) -> SyncTask {
    self.queue.enqueue(method, target, payload)
  }

  /// Like [`SyncEngine::enqueue`], but reports storage failures.
  pub fn try_enqueue(
    &self,
    method: Method,
    target: impl Into<String>,
    payload: Value,
  ) -> Result<SyncTask, StoreError> {
    self
      .queue
      .try_enqueue(method, target, payload)
      .map_err(|(_, e)| e)
  }

  pub fn pending(&self) -> Result<Vec<SyncTask>, StoreError> {
    self.queue.peek_all()
  }

  /// Live read of `target`, cached under `key`, with offline fallback.
  pub async fn read(&self, key: &CacheKey, target: &str) -> Result<CacheResult<Value>, TransportError> {
    let transport = self.transport.clone();
    let target = target.to_string();
    self
      .cache
      .fetch(key, || async move { transport.fetch(&target).await })
      .await
  }

  pub fn cache(&self) -> &OfflineCache {
    &self.cache
  }

  /// Feed a platform connectivity signal.
  pub fn set_connectivity(&self, state: Connectivity) -> bool {
    self.monitor.report(state)
  }

  /// Drain now. `None` when a drain is already running.
  pub async fn process_now(&self) -> Option<DrainReport> {
    self.processor.process_now().await
  }

  pub fn clear_queue(&self) -> Result<usize, StoreError> {
    self.queue.clear()
  }

  pub fn clear_cache(&self) -> usize {
    self.cache.clear()
  }

  pub fn failures(&self) -> Result<Vec<FailedTask>, StoreError> {
    self.processor.failures()
  }

  pub fn clear_failures(&self) -> Result<usize, StoreError> {
    self.processor.clear_failures()
  }

  pub fn status(&self) -> SyncStatus {
    self.status.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.status.subscribe()
  }

  pub fn is_online(&self) -> bool {
    self.status().is_online
  }

  pub fn is_syncing(&self) -> bool {
    self.status().is_syncing
  }

  pub fn pending_count(&self) -> usize {
    self.status().pending_count
  }

  pub fn background_scheduler(&self) -> &dyn BackgroundScheduler {
    self.scheduler.as_ref()
  }
}
