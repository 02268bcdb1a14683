use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use pantry_sync::cache::{CacheKey, CacheSource};
use pantry_sync::config::Config;
use pantry_sync::sync::Method;
use pantry_sync::{logging, SyncEngine};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pantry-sync")]
#[command(about = "Offline mutation queue and read cache for the pantry grocery manager")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pantry-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep all state in memory instead of the SQLite database
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Queue a mutation for replay
  Enqueue {
    /// POST, PUT, PATCH or DELETE
    method: Method,
    /// Endpoint relative to the server base URL
    target: String,
    /// JSON request body
    payload: Option<String>,
  },
  /// Show pending tasks, failure count and cached keys
  Status,
  /// Replay the queue once
  Sync,
  /// Read a resource, falling back to the offline cache
  Get {
    target: String,
    /// Cache key, e.g. "products" or "shopping-list:42"
    #[arg(short, long)]
    key: CacheKey,
  },
  /// List tasks that were dropped after failing permanently
  Failures,
  /// Forget dropped tasks
  ClearFailures,
  /// Drop every pending task
  ClearQueue,
  /// Wipe the offline cache
  ClearCache,
  /// Keep syncing in the foreground until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose);

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let engine = SyncEngine::open(config, args.ephemeral)?;

  match args.command {
    Command::Enqueue {
      method,
      target,
      payload,
    } => {
      let payload: Value = match payload {
        Some(raw) => {
          serde_json::from_str(&raw).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?
        }
        None => Value::Null,
      };
      let task = engine
        .try_enqueue(method, target, payload)
        .map_err(|e| eyre!("Task could not be stored: {}", e))?;
      println!("queued {} {} ({})", task.method, task.target, task.id);
    }

    Command::Status => {
      let status = engine.status();
      let pending = engine.pending()?;
      println!("pending: {}", status.pending_count);
      println!("failed:  {}", status.failed_count);
      for task in pending {
        let error = task.last_error.as_deref().unwrap_or("-");
        println!(
          "  {} {:<6} {:<40} attempts={} queued={} last_error={}",
          task.id,
          task.method,
          task.target,
          task.attempts,
          task.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          error
        );
      }
      let cached = engine.cache().keys();
      if !cached.is_empty() {
        println!("cached:  {}", cached.join(", "));
      }
    }

    Command::Sync => match engine.process_now().await {
      Some(report) => println!(
        "settled {}, retrying {}, dropped {}, pending {}",
        report.settled, report.retrying, report.dropped, report.pending
      ),
      None => println!("a sync is already running"),
    },

    Command::Get { target, key } => {
      let result = engine
        .read(&key, &target)
        .await
        .map_err(|e| eyre!("No live or cached data for {}: {}", key, e))?;
      match (result.source, result.stored_at) {
        (CacheSource::Network, _) => eprintln!("source: network"),
        (source, Some(stored_at)) => eprintln!("source: {:?} (cached {})", source, stored_at),
        (source, None) => eprintln!("source: {:?}", source),
      }
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }

    Command::Failures => {
      let failures = engine.failures()?;
      if failures.is_empty() {
        println!("no failed tasks");
      }
      for failed in failures {
        println!(
          "{} {} {} failed={} reason={}",
          failed.task.id,
          failed.task.method,
          failed.task.target,
          failed.failed_at.format("%Y-%m-%d %H:%M:%S"),
          failed.reason
        );
      }
    }

    Command::ClearFailures => println!("removed {} failure records", engine.clear_failures()?),

    Command::ClearQueue => println!("removed {} pending tasks", engine.clear_queue()?),

    Command::ClearCache => println!("removed {} cache entries", engine.clear_cache()),

    Command::Run => {
      let background = engine.init(true);
      tracing::info!(background, "pantry-sync running, press Ctrl-C to stop");

      let mut status = engine.subscribe();
      loop {
        tokio::select! {
          changed = status.changed() => {
            if changed.is_err() {
              break;
            }
            let s = *status.borrow_and_update();
            tracing::info!(
              online = s.is_online,
              syncing = s.is_syncing,
              pending = s.pending_count,
              failed = s.failed_count,
              "status"
            );
          }
          _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            break;
          }
        }
      }

      engine.teardown().await;
    }
  }

  Ok(())
}
