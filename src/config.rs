use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub sync: SyncConfig,
  pub cache: CacheConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Base URL every task target and cache read is resolved against
  pub base_url: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Replay attempts before a task is dropped
  pub max_retries: u32,
  /// Periodic drain while online
  pub tick_interval_secs: u64,
  pub request_timeout_secs: u64,
  /// Reachability probe used by `run`
  pub probe_interval_secs: u64,
  /// Register the background scheduler
  pub background: bool,
  pub background_interval_secs: u64,
  /// Drop tasks on a 4xx rejection instead of retrying them
  pub drop_rejected: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      tick_interval_secs: 300,
      request_timeout_secs: 15,
      probe_interval_secs: 30,
      background: true,
      background_interval_secs: 900,
      drop_rejected: true,
    }
  }
}

impl SyncConfig {
  pub fn tick_interval(&self) -> Duration {
    Duration::from_secs(self.tick_interval_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs)
  }

  pub fn background_interval(&self) -> Duration {
    Duration::from_secs(self.background_interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Age after which cached reads are flagged stale (never evicted)
  pub stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { stale_secs: 300 }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/pantry-sync/sync.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pantry-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pantry-sync/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pantry-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pantry-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Reject values the engine cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.sync.max_retries == 0 {
      return Err(eyre!("sync.max_retries must be at least 1"));
    }
    for (name, secs) in [
      ("sync.tick_interval_secs", self.sync.tick_interval_secs),
      ("sync.request_timeout_secs", self.sync.request_timeout_secs),
      ("sync.probe_interval_secs", self.sync.probe_interval_secs),
      ("sync.background_interval_secs", self.sync.background_interval_secs),
    ] {
      if secs == 0 {
        return Err(eyre!("{} must be greater than zero", name));
      }
    }
    url::Url::parse(&self.server.base_url)
      .map_err(|e| eyre!("Invalid server.base_url '{}': {}", self.server.base_url, e))?;
    Ok(())
  }

  /// Get the API bearer token from the environment, if set.
  ///
  /// Checks PANTRY_SYNC_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PANTRY_SYNC_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
