//! Network seam between the engine and the grocery API.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;

use super::task::SyncTask;

/// Why a request did not produce a 2xx response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  #[error("server responded with HTTP {status}")]
  Status { status: u16 },

  #[error("invalid target '{target}': {reason}")]
  InvalidTarget { target: String, reason: String },
}

impl TransportError {
  /// The server refused the request itself; replaying it again cannot help.
  ///
  /// 408 and 429 are client-range codes that still describe a transient
  /// condition.
  pub fn is_rejection(&self) -> bool {
    match self {
      TransportError::Status { status } => {
        (400..500).contains(status) && *status != 408 && *status != 429
      }
      TransportError::InvalidTarget { .. } => true,
      TransportError::Network(_) | TransportError::Timeout => false,
    }
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      TransportError::Timeout
    } else if let Some(status) = e.status() {
      TransportError::Status {
        status: status.as_u16(),
      }
    } else {
      TransportError::Network(e.to_string())
    }
  }
}

/// Issues the requests the engine depends on.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Replay a queued mutation. `Ok` carries the 2xx status code.
  async fn replay(&self, task: &SyncTask) -> Result<u16, TransportError>;

  /// Live GET of a read model.
  async fn fetch(&self, target: &str) -> Result<Value, TransportError>;

  /// Whether the server can currently be reached at all.
  async fn probe(&self) -> bool;
}

/// reqwest-backed transport against the configured server.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(
    base_url: &str,
    timeout: Duration,
    token: Option<String>,
  ) -> Result<Self, TransportError> {
    let mut base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidTarget {
      target: base_url.to_string(),
      reason: e.to_string(),
    })?;
    // Url::join replaces the last path segment unless the base ends in '/'.
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Network(e.to_string()))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn from_config(config: &Config) -> Result<Self, TransportError> {
    Self::new(
      &config.server.base_url,
      config.sync.request_timeout(),
      Config::get_api_token(),
    )
  }

  fn url(&self, target: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(target.trim_start_matches('/'))
      .map_err(|e| TransportError::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
      })
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn replay(&self, task: &SyncTask) -> Result<u16, TransportError> {
    let url = self.url(&task.target)?;
    let response = self
      .request(task.method.into(), url)
      .json(&task.payload)
      .send()
      .await?;

    let status = response.status();
    if status.is_success() {
      Ok(status.as_u16())
    } else {
      Err(TransportError::Status {
        status: status.as_u16(),
      })
    }
  }

  async fn fetch(&self, target: &str) -> Result<Value, TransportError> {
    let url = self.url(target)?;
    let response = self
      .request(reqwest::Method::GET, url)
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn probe(&self) -> bool {
    // Any HTTP answer, even an error page, means the server is reachable.
    self
      .request(reqwest::Method::GET, self.base_url.clone())
      .send()
      .await
      .is_ok()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::task::Method;
  use serde_json::json;

  fn task(method: Method, target: &str, payload: Value) -> SyncTask {
    SyncTask::new(1, method, target.to_string(), payload)
  }

  #[test]
  fn test_rejection_classification() {
    assert!(TransportError::Status { status: 400 }.is_rejection());
    assert!(TransportError::Status { status: 422 }.is_rejection());
    assert!(!TransportError::Status { status: 408 }.is_rejection());
    assert!(!TransportError::Status { status: 429 }.is_rejection());
    assert!(!TransportError::Status { status: 503 }.is_rejection());
    assert!(!TransportError::Timeout.is_rejection());
    assert!(!TransportError::Network("reset".into()).is_rejection());
  }

  #[test]
  fn test_base_url_keeps_its_path() {
    let transport =
      HttpTransport::new("http://localhost:3000/app", Duration::from_secs(1), None).unwrap();
    assert_eq!(
      transport.url("/api/products").unwrap().as_str(),
      "http://localhost:3000/app/api/products"
    );
  }

  #[tokio::test]
  async fn test_replay_sends_method_and_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("PATCH", "/api/shopping-lists/1/items/7")
      .match_header("authorization", "Bearer secret")
      .match_body(mockito::Matcher::Json(json!({"checked": true})))
      .with_status(204)
      .create_async()
      .await;

    let transport =
      HttpTransport::new(&server.url(), Duration::from_secs(5), Some("secret".into())).unwrap();
    let status = transport
      .replay(&task(
        Method::Patch,
        "api/shopping-lists/1/items/7",
        json!({"checked": true}),
      ))
      .await
      .unwrap();

    assert_eq!(status, 204);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_replay_reports_non_success_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("POST", "/api/purchases")
      .with_status(500)
      .create_async()
      .await;

    let transport = HttpTransport::new(&server.url(), Duration::from_secs(5), None).unwrap();
    let result = transport
      .replay(&task(Method::Post, "api/purchases", json!({"total": 12.5})))
      .await;

    assert_eq!(result, Err(TransportError::Status { status: 500 }));
  }

  #[tokio::test]
  async fn test_fetch_parses_json_and_maps_errors() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
      .mock("GET", "/api/products")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"id":1,"name":"Rice"}]"#)
      .create_async()
      .await;
    let _missing = server
      .mock("GET", "/api/stock")
      .with_status(404)
      .create_async()
      .await;

    let transport = HttpTransport::new(&server.url(), Duration::from_secs(5), None).unwrap();
    assert_eq!(
      transport.fetch("api/products").await.unwrap(),
      json!([{"id": 1, "name": "Rice"}])
    );
    assert_eq!(
      transport.fetch("api/stock").await,
      Err(TransportError::Status { status: 404 })
    );
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    // Nothing listens on port 9 (discard) in test environments.
    let transport =
      HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2), None).unwrap();
    assert!(!transport.probe().await);
    let result = transport.fetch("api/products").await;
    assert!(matches!(
      result,
      Err(TransportError::Network(_)) | Err(TransportError::Timeout)
    ));
  }
}
