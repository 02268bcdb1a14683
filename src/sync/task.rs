use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Mutating HTTP verb a task is replayed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!(
        "unsupported method '{}' (expected POST, PUT, PATCH or DELETE)",
        other
      )),
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A user mutation waiting to be replayed against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
  pub id: String,
  /// Insertion counter; ties on `enqueued_at` are broken by this
  pub sequence: u64,
  pub method: Method,
  /// Endpoint path relative to the server base URL (e.g. "api/shopping-lists/3/items")
  pub target: String,
  /// Request body captured when the user acted
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  pub attempts: u32,
  #[serde(default)]
  pub last_error: Option<String>,
}

impl SyncTask {
  pub(crate) fn new(sequence: u64, method: Method, target: String, payload: Value) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      sequence,
      method,
      target,
      payload,
      enqueued_at: Utc::now(),
      attempts: 0,
      last_error: None,
    }
  }
}

/// A task that will never be retried again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
  pub task: SyncTask,
  pub reason: String,
  pub failed_at: DateTime<Utc>,
}
