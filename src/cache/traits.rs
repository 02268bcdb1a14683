//! Core types for the offline read cache.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Identifies one cached read model.
///
/// Rendered as `namespace` or `namespace:id`, e.g. `products` or
/// `shopping-list:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  Products,
  Stock,
  ShoppingLists,
  ShoppingList { id: String },
  Purchases,
  DashboardStats,
  /// Any other read model
  Other { namespace: String, id: Option<String> },
}

impl CacheKey {
  pub fn namespace(&self) -> &str {
    match self {
      Self::Products => "products",
      Self::Stock => "stock",
      Self::ShoppingLists => "shopping-lists",
      Self::ShoppingList { .. } => "shopping-list",
      Self::Purchases => "purchases",
      Self::DashboardStats => "dashboard-stats",
      Self::Other { namespace, .. } => namespace.as_str(),
    }
  }

  pub fn id(&self) -> Option<&str> {
    match self {
      Self::ShoppingList { id } => Some(id.as_str()),
      Self::Other { id, .. } => id.as_deref(),
      _ => None,
    }
  }

  /// Key under which the entry is stored.
  pub fn storage_key(&self) -> String {
    match self.id() {
      Some(id) => format!("{}:{}", self.namespace(), id),
      None => self.namespace().to_string(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.storage_key())
  }
}

impl FromStr for CacheKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (namespace, id) = match s.split_once(':') {
      Some((ns, id)) => (ns.trim(), Some(id.trim())),
      None => (s.trim(), None),
    };
    if namespace.is_empty() || id.is_some_and(str::is_empty) {
      return Err(format!("invalid cache key '{}'", s));
    }

    Ok(match (namespace, id) {
      ("products", None) => Self::Products,
      ("stock", None) => Self::Stock,
      ("shopping-lists", None) => Self::ShoppingLists,
      ("shopping-list", Some(id)) => Self::ShoppingList { id: id.to_string() },
      ("purchases", None) => Self::Purchases,
      ("dashboard-stats", None) => Self::DashboardStats,
      (namespace, id) => Self::Other {
        namespace: namespace.to_string(),
        id: id.map(String::from),
      },
    })
  }
}

/// A snapshot read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub key: String,
  pub data: T,
  pub stored_at: DateTime<Utc>,
  /// Older than the configured stale time. Advisory only.
  pub is_stale: bool,
}

/// Result of a read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub stored_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      stored_at: None,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.data,
      source: if entry.is_stale {
        CacheSource::OfflineStale
      } else {
        CacheSource::Offline
      },
      stored_at: Some(entry.stored_at),
    }
  }

  pub fn is_offline(&self) -> bool {
    !matches!(self.source, CacheSource::Network)
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving a cached snapshot
  Offline,
  /// Network unavailable, serving a snapshot older than the stale time
  OfflineStale,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_round_trips_through_string() {
    for key in [
      CacheKey::Products,
      CacheKey::DashboardStats,
      CacheKey::ShoppingList { id: "42".into() },
      CacheKey::Other {
        namespace: "recipes".into(),
        id: Some("7".into()),
      },
      CacheKey::Other {
        namespace: "budgets".into(),
        id: None,
      },
    ] {
      assert_eq!(key.to_string().parse::<CacheKey>(), Ok(key));
    }
  }

  #[test]
  fn test_storage_key_format() {
    assert_eq!(CacheKey::Stock.storage_key(), "stock");
    assert_eq!(
      CacheKey::ShoppingList { id: "9".into() }.storage_key(),
      "shopping-list:9"
    );
  }

  #[test]
  fn test_invalid_keys_rejected() {
    assert!("".parse::<CacheKey>().is_err());
    assert!("shopping-list:".parse::<CacheKey>().is_err());
    assert!(":5".parse::<CacheKey>().is_err());
  }
}
