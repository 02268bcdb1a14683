//! Offline mutation queue and everything that drains it.
//!
//! - [`SyncQueue`] buffers mutations durably while the device is offline
//! - [`QueueProcessor`] replays them in order with bounded retries
//! - [`ConnectivityMonitor`] decides when to drain
//! - [`BackgroundScheduler`] keeps draining outside the foreground flow
//! - [`StatusBoard`] publishes online/syncing/pending state to the UI

mod monitor;
mod processor;
mod queue;
mod scheduler;
mod status;
mod task;
mod transport;

pub use monitor::{Connectivity, ConnectivityMonitor, MonitorHandle, DEFAULT_TICK};
pub use processor::{
  DrainReport, ProcessorOptions, QueueProcessor, DEFAULT_MAX_RETRIES, FAILURE_NAMESPACE,
};
pub use queue::{SyncQueue, QUEUE_NAMESPACE};
pub use scheduler::{BackgroundScheduler, NoopScheduler, RuntimeScheduler};
pub use status::{StatusBoard, SyncStatus};
pub use task::{FailedTask, Method, SyncTask};
pub use transport::{HttpTransport, Transport, TransportError};

#[cfg(test)]
pub(crate) use transport::testing;
