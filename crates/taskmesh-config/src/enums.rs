use serde::{Deserialize, Serialize};

/// How the wait between two dispatch attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  #[default]
  Constant,
  Linear,
  Exponential,
}

impl RetryBackoff {
  /// Multiplier applied to the base backoff before attempt `attempt` (1-based).
  pub fn factor(&self, attempt: u32) -> u32 {
    match self {
      RetryBackoff::Constant => 1,
      RetryBackoff::Linear => attempt.max(1),
      RetryBackoff::Exponential => 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX),
    }
  }
}

/// Composition operator names as they appear in pipeline definitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
  #[default]
  Forward,
  Scatter,
  Broadcast,
  Aggregate,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_factors() {
    assert_eq!(RetryBackoff::Constant.factor(5), 1);
    assert_eq!(RetryBackoff::Linear.factor(3), 3);
    assert_eq!(RetryBackoff::Exponential.factor(1), 1);
    assert_eq!(RetryBackoff::Exponential.factor(4), 8);
    assert_eq!(RetryBackoff::Exponential.factor(64), u32::MAX);
  }
}
