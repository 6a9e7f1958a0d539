use thiserror::Error;

/// Errors raised at the network boundary.
#[derive(Debug, Error)]
pub enum NetworkError {
  /// The RPC endpoint could not be reached.
  #[error("network unreachable: {message}")]
  Unreachable { message: String },

  /// The endpoint rejected the API key.
  #[error("authentication failed for RPC endpoint")]
  Authentication,

  /// The serialized task exceeds the network's message limit.
  #[error("message of {size} bytes exceeds the {limit} byte limit")]
  MessageTooLarge { size: usize, limit: usize },

  /// The endpoint answered with something that is not a valid response.
  #[error("invalid response from RPC endpoint: {message}")]
  InvalidResponse { message: String },

  /// The client was used before `connect` or after `close`.
  #[error("network client is not connected")]
  NotConnected,

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
}

impl NetworkError {
  /// Whether trying the same request again may succeed.
  ///
  /// Only an unreachable endpoint, a transient HTTP failure or a garbled
  /// response qualify. Authentication, size and connection-state errors
  /// fail the same way on every attempt.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Unreachable { .. } | Self::InvalidResponse { .. } => true,
      Self::Http(e) => {
        e.is_timeout()
          || e.is_connect()
          || e.status().is_some_and(|status| status.is_server_error())
      }
      Self::Authentication | Self::MessageTooLarge { .. } | Self::NotConnected => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_errors() {
    let unreachable = NetworkError::Unreachable {
      message: "connection refused".to_string(),
    };
    assert!(unreachable.is_retryable());

    let garbled = NetworkError::InvalidResponse {
      message: "expected JSON".to_string(),
    };
    assert!(garbled.is_retryable());
  }

  #[test]
  fn test_deterministic_errors_are_not_retryable() {
    assert!(!NetworkError::Authentication.is_retryable());
    assert!(!NetworkError::NotConnected.is_retryable());
    assert!(!NetworkError::MessageTooLarge { size: 4096, limit: 1024 }.is_retryable());
  }
}
