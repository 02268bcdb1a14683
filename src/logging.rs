//! Tracing setup for the CLI host.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter, e.g. `pantry_sync=debug`.
pub const LOG_ENV: &str = "PANTRY_SYNC_LOG";

/// Install the global subscriber.
///
/// Logs go to stderr and, when a data directory exists, to a daily rolling
/// file under `$XDG_DATA_HOME/pantry-sync/logs`. Keep the returned guard alive
/// for as long as file logs should be flushed.
pub fn init(verbose: bool) -> Option<WorkerGuard> {
  let default_level = if verbose {
    "pantry_sync=debug"
  } else {
    "pantry_sync=info"
  };
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let log_dir = dirs::data_dir().map(|d| d.join("pantry-sync").join("logs"));
  let (file_layer, guard) = match log_dir {
    Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
      let appender = tracing_appender::rolling::daily(dir, "pantry-sync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    _ => (None, None),
  };

  let result = tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init();
  if result.is_err() {
    // Already installed (tests, embedding hosts); keep theirs.
    return None;
  }

  guard
}
