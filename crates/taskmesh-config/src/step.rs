use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-step execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
  /// Executor tags or group names the step's tasks may run on.
  pub accepted_executors: Vec<String>,

  /// Fraction (0.0 to 1.0) of the stage's tasks that must succeed.
  ///
  /// When unset, any number of failures is tolerated as long as one task
  /// produces a usable output.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_compute: Option<f64>,

  /// Overrides `DispatchConfig::max_retries` for this step's tasks.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,

  /// Overrides `DispatchConfig::task_timeout_ms` for this step's tasks.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,

  /// Restrict executors to those supporting function calling.
  pub function_calling: bool,
}

impl StepConfig {
  pub fn validate(&self, step: &str) -> Result<(), ConfigError> {
    if self.accepted_executors.is_empty() {
      return Err(ConfigError::invalid(
        format!("steps.{step}.accepted_executors"),
        "at least one executor is required",
      ));
    }
    if let Some(min) = self.min_compute.filter(|m| !(0.0..=1.0).contains(m)) {
      return Err(ConfigError::invalid(
        format!("steps.{step}.min_compute"),
        format!("{min} is outside 0.0..=1.0"),
      ));
    }
    if self.timeout_ms == Some(0) {
      return Err(ConfigError::invalid(
        format!("steps.{step}.timeout_ms"),
        "must be greater than zero",
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> StepConfig {
    StepConfig {
      accepted_executors: vec!["gpt-4o".to_string()],
      ..Default::default()
    }
  }

  #[test]
  fn test_valid_config() {
    assert!(config().validate("summarize").is_ok());
  }

  #[test]
  fn test_min_compute_out_of_range() {
    let step = StepConfig {
      min_compute: Some(1.5),
      ..config()
    };
    let err = step.validate("summarize").unwrap_err();
    assert!(err.to_string().contains("steps.summarize.min_compute"));
  }

  #[test]
  fn test_no_executors() {
    let step = StepConfig::default();
    assert!(step.validate("summarize").is_err());
  }
}
