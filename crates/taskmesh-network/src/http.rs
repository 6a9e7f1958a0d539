//! HTTP client for the worker node RPC endpoint.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use taskmesh_config::NetworkConfig;
use taskmesh_task::{ExecutorOutput, Task};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::NetworkError;
use crate::network::{FetchStatus, Network, PublishAck};

const HEALTHY: &str = "Node is healthy";

/// Executor error text that marks a payload the network will never accept.
const INVALID_PROMPT: &str = "Invalid prompt";

/// Envelope published for every task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskEnvelope<'a> {
  task_id: &'a str,
  payload: &'a serde_json::Value,
  executors: &'a [String],
  deadline: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pipeline_id: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  step_name: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct PublishResponse {
  #[serde(default)]
  assigned_executor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
  #[serde(default)]
  data: Option<ResultBody>,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
  #[serde(default)]
  result: Option<serde_json::Value>,
  #[serde(default)]
  executor: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

/// [`Network`] implementation backed by a node's HTTP RPC endpoint.
///
/// The client is created by [`HttpNetwork::new`] or [`HttpNetwork::connect`]
/// and released by [`HttpNetwork::close`]. Calls made after `close` fail with
/// [`NetworkError::NotConnected`].
pub struct HttpNetwork {
  base_url: Url,
  max_message_bytes: usize,
  client: RwLock<Option<Client>>,
}

impl HttpNetwork {
  /// Build a client without contacting the endpoint.
  pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
    let base_url = Url::parse(&config.base_url).map_err(|e| NetworkError::Unreachable {
      message: format!("invalid base url '{}': {}", config.base_url, e),
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(token) = config.resolve_auth_token() {
      let value = HeaderValue::from_str(&token).map_err(|_| NetworkError::Authentication)?;
      headers.insert("x-api-key", value);
    }

    let client = Client::builder()
      .default_headers(headers)
      .timeout(config.request_timeout())
      .build()?;

    Ok(Self {
      base_url,
      max_message_bytes: config.max_message_kb * 1024,
      client: RwLock::new(Some(client)),
    })
  }

  /// Build a client and verify the endpoint reports itself healthy.
  pub async fn connect(config: &NetworkConfig) -> Result<Self, NetworkError> {
    let network = Self::new(config)?;
    if !network.health_check().await? {
      return Err(NetworkError::Unreachable {
        message: format!("node at {} is not healthy", network.base_url),
      });
    }
    Ok(network)
  }

  /// Release the underlying connection pool.
  pub fn close(&self) {
    let mut client = self.client.write().unwrap_or_else(|e| e.into_inner());
    *client = None;
  }

  #[instrument(name = "rpc_health_check", skip(self), fields(base_url = %self.base_url))]
  pub async fn health_check(&self) -> Result<bool, NetworkError> {
    let client = self.client()?;
    let response = client
      .get(self.endpoint("health"))
      .send()
      .await
      .map_err(transport)?;
    let text = response.text().await.map_err(transport)?;
    Ok(text.trim() == HEALTHY)
  }

  fn client(&self) -> Result<Client, NetworkError> {
    self
      .client
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
      .ok_or(NetworkError::NotConnected)
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
  }

  fn envelope(&self, task: &Task) -> Result<String, NetworkError> {
    let remaining = task
      .deadline()
      .saturating_duration_since(tokio::time::Instant::now());
    let remaining = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());

    let envelope = TaskEnvelope {
      task_id: task.id(),
      payload: task.payload(),
      executors: task.accepted_executors(),
      deadline: Utc::now() + remaining,
      pipeline_id: task.pipeline_id(),
      step_name: task.step_name(),
    };

    let encoded = serde_json::to_string(&envelope).map_err(|e| NetworkError::InvalidResponse {
      message: format!("failed to encode task envelope: {}", e),
    })?;

    if encoded.len() > self.max_message_bytes {
      return Err(NetworkError::MessageTooLarge {
        size: encoded.len(),
        limit: self.max_message_bytes,
      });
    }
    Ok(encoded)
  }
}

#[async_trait]
impl Network for HttpNetwork {
  #[instrument(name = "rpc_publish", skip(self, task), fields(task_id = %task.id()))]
  async fn publish(&self, task: &Task) -> Result<PublishAck, NetworkError> {
    let client = self.client()?;
    let envelope = self.envelope(task)?;

    let response = client
      .post(self.endpoint("rpc/task"))
      .json(&serde_json::json!({ "value": { "payload": envelope } }))
      .send()
      .await
      .map_err(transport)?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
      return Err(NetworkError::Authentication);
    }
    if !status.is_success() {
      return Err(NetworkError::InvalidResponse {
        message: format!("publish returned {}", status),
      });
    }

    // Older nodes answer with an empty body.
    let body = response.text().await.map_err(transport)?;
    let ack: PublishResponse = serde_json::from_str(&body).unwrap_or_default();
    debug!(task_id = %task.id(), assigned = ?ack.assigned_executor, "rpc_published");

    Ok(PublishAck {
      task_id: task.id().to_string(),
      assigned_executor: ack.assigned_executor,
    })
  }

  #[instrument(name = "rpc_fetch", skip(self))]
  async fn fetch(&self, task_id: &str) -> Result<FetchStatus, NetworkError> {
    let client = self.client()?;
    let response = client
      .get(self.endpoint(&format!("rpc/results/{}", task_id)))
      .send()
      .await
      .map_err(transport)?;

    match response.status() {
      StatusCode::NOT_FOUND => return Ok(FetchStatus::Pending),
      StatusCode::UNAUTHORIZED => return Err(NetworkError::Authentication),
      status if !status.is_success() => {
        return Err(NetworkError::InvalidResponse {
          message: format!("fetch returned {}", status),
        });
      }
      _ => {}
    }

    let body: ResultResponse = response.json().await.map_err(|e| NetworkError::InvalidResponse {
      message: e.to_string(),
    })?;

    let Some(data) = body.data else {
      return Ok(FetchStatus::Pending);
    };

    if let Some(message) = data.error {
      let retryable = !message.contains(INVALID_PROMPT);
      if !retryable {
        warn!(task_id = %task_id, error = %message, "executor rejected payload");
      }
      return Ok(FetchStatus::Error {
        message,
        executor_id: data.executor,
        retryable,
      });
    }

    match data.result {
      Some(result) => Ok(FetchStatus::Ready(ExecutorOutput::new(
        data.executor.unwrap_or_default(),
        result,
      ))),
      None => Ok(FetchStatus::Pending),
    }
  }
}

fn transport(e: reqwest::Error) -> NetworkError {
  if e.is_connect() || e.is_timeout() {
    NetworkError::Unreachable {
      message: e.to_string(),
    }
  } else {
    NetworkError::Http(e)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;

  use super::*;

  fn config() -> NetworkConfig {
    NetworkConfig {
      base_url: "http://127.0.0.1:1".to_string(),
      auth_token: Some("token".to_string()),
      max_message_kb: 1,
      ..Default::default()
    }
  }

  fn task(payload: serde_json::Value) -> Task {
    Task::new(payload, vec!["gpt-4o".to_string()], Duration::from_secs(30)).unwrap()
  }

  #[tokio::test]
  async fn test_oversized_envelope_rejected_before_sending() {
    let network = HttpNetwork::new(&config()).unwrap();
    let err = network
      .publish(&task(json!({ "prompt": "x".repeat(2048) })))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::MessageTooLarge { limit: 1024, .. }));
  }

  #[tokio::test]
  async fn test_calls_after_close_fail() {
    let network = HttpNetwork::new(&config()).unwrap();
    network.close();

    let err = network.fetch("some-task").await.unwrap_err();
    assert!(matches!(err, NetworkError::NotConnected));
  }

  #[test]
  fn test_envelope_fields() {
    let network = HttpNetwork::new(&config()).unwrap();
    let task = task(json!({ "prompt": "hi" })).with_origin("p-1", "generate");

    let encoded = network.envelope(&task).unwrap();
    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

    assert_eq!(value["taskId"], json!(task.id()));
    assert_eq!(value["executors"], json!(["gpt-4o"]));
    assert_eq!(value["stepName"], json!("generate"));
    assert!(value["deadline"].is_string());
  }

  #[test]
  fn test_endpoint_joins_paths() {
    let network = HttpNetwork::new(&NetworkConfig {
      base_url: "http://node.local:8006/".to_string(),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(network.endpoint("rpc/task"), "http://node.local:8006/rpc/task");
  }
}
