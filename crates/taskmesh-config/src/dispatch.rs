use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enums::RetryBackoff;
use crate::error::ConfigError;

/// Settings for publishing tasks and polling for their results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
  /// Interval between two fetches for the same task.
  pub poll_interval_ms: u64,
  /// Default time a single attempt may take before it times out.
  pub task_timeout_ms: u64,
  /// Time without a result after which the assigned executor is considered slow.
  pub silence_window_ms: u64,
  /// How long a slow or unresponsive executor stays blacklisted.
  pub blacklist_duration_ms: u64,
  /// Default number of republish attempts after the first one.
  pub max_retries: u32,
  /// Base wait before republishing a task.
  pub retry_backoff_ms: u64,
  /// Growth of the wait between attempts.
  pub retry_backoff: RetryBackoff,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 1_000,
      task_timeout_ms: 300_000,
      silence_window_ms: 60_000,
      blacklist_duration_ms: 300_000,
      max_retries: 2,
      retry_backoff_ms: 1_000,
      retry_backoff: RetryBackoff::Constant,
    }
  }
}

impl DispatchConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn task_timeout(&self) -> Duration {
    Duration::from_millis(self.task_timeout_ms)
  }

  pub fn silence_window(&self) -> Duration {
    Duration::from_millis(self.silence_window_ms)
  }

  pub fn blacklist_duration(&self) -> Duration {
    Duration::from_millis(self.blacklist_duration_ms)
  }

  /// Wait before publishing attempt number `attempt` (1 = first retry).
  pub fn backoff_for(&self, attempt: u32) -> Duration {
    Duration::from_millis(self.retry_backoff_ms)
      .saturating_mul(self.retry_backoff.factor(attempt))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.poll_interval_ms == 0 {
      return Err(ConfigError::invalid(
        "dispatch.poll_interval_ms",
        "must be greater than zero",
      ));
    }
    if self.task_timeout_ms == 0 {
      return Err(ConfigError::invalid(
        "dispatch.task_timeout_ms",
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
  fn test_partial_json_uses_defaults() {
    let config: DispatchConfig =
      serde_json::from_str(r#"{ "max_retries": 5, "retry_backoff": "linear" }"#).unwrap();

    assert_eq!(config.max_retries, 5);
    assert_eq!(config.retry_backoff, RetryBackoff::Linear);
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.task_timeout(), Duration::from_secs(300));
  }

  #[test]
  fn test_backoff_for_attempt() {
    let config = DispatchConfig {
      retry_backoff_ms: 100,
      retry_backoff: RetryBackoff::Exponential,
      ..Default::default()
    };

    assert_eq!(config.backoff_for(1), Duration::from_millis(100));
    assert_eq!(config.backoff_for(3), Duration::from_millis(400));
  }

  #[test]
  fn test_zero_poll_interval_rejected() {
    let config = DispatchConfig {
      poll_interval_ms: 0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidField { .. })
    ));
  }
}
