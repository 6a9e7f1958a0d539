use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable consulted when no auth token is configured.
pub const RPC_TOKEN_ENV: &str = "TASKMESH_RPC_TOKEN";

/// Connection settings for the worker network RPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Base URL of the RPC endpoint, e.g. "http://127.0.0.1:8006".
  pub base_url: String,
  /// API key sent with every request.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub auth_token: Option<String>,
  /// Per-request timeout.
  pub request_timeout_ms: u64,
  /// Largest envelope the network accepts, in KiB.
  pub max_message_kb: usize,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8006".to_string(),
      auth_token: None,
      request_timeout_ms: 30_000,
      max_message_kb: 128,
    }
  }
}

impl NetworkConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  /// The configured token, or the one from the environment.
  pub fn resolve_auth_token(&self) -> Option<String> {
    self
      .auth_token
      .clone()
      .or_else(|| std::env::var(RPC_TOKEN_ENV).ok())
      .filter(|token| !token.is_empty())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    url::Url::parse(&self.base_url)
      .map_err(|e| ConfigError::invalid("network.base_url", e.to_string()))?;
    if self.max_message_kb == 0 {
      return Err(ConfigError::invalid(
        "network.max_message_kb",
        "must be greater than zero",
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalid_base_url_rejected() {
    let config = NetworkConfig {
      base_url: "not a url".to_string(),
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_configured_token_wins() {
    let config = NetworkConfig {
      auth_token: Some("secret".to_string()),
      ..Default::default()
    };
    assert_eq!(config.resolve_auth_token().as_deref(), Some("secret"));
  }
}
