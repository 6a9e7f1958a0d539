use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::enums::OperatorKind;
use crate::error::ConfigError;
use crate::step::StepConfig;

/// A pipeline definition as it appears in a JSON file.
///
/// ```json
/// {
///   "name": "subtopics",
///   "input": { "topic": "rust" },
///   "steps": [
///     {
///       "name": "generate",
///       "template": "List five subtopics of {{ topic }} as a JSON array.",
///       "operator": { "kind": "scatter" },
///       "config": { "accepted_executors": ["openai"] }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,

  /// Root input handed to the first step.
  #[serde(default)]
  pub input: serde_json::Map<String, serde_json::Value>,

  pub steps: Vec<StepDef>,
}

/// A single step of a [`PipelineDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub name: String,

  /// Template rendered with the task input to build the payload.
  pub template: String,

  /// Input keys the template expects. Derived from the template when empty.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub input_keys: Vec<String>,

  /// How this step's outputs become the next step's inputs.
  #[serde(default)]
  pub operator: OperatorDef,

  #[serde(default)]
  pub config: StepConfig,
}

/// Composition operator reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
  pub kind: OperatorKind,

  /// Number of copies produced by `broadcast`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub n: Option<usize>,
}

impl PipelineDef {
  /// Structural checks that do not need a runtime.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.steps.is_empty() {
      return Err(ConfigError::invalid("steps", "pipeline has no steps"));
    }

    let mut seen = HashSet::new();
    for step in &self.steps {
      if !seen.insert(step.name.as_str()) {
        return Err(ConfigError::invalid(
          "steps",
          format!("duplicate step name '{}'", step.name),
        ));
      }
      step.validate()?;
    }
    Ok(())
  }
}

impl StepDef {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.name.is_empty() {
      return Err(ConfigError::invalid("steps.name", "must not be empty"));
    }
    if self.operator.kind == OperatorKind::Broadcast && self.operator.n == Some(0) {
      return Err(ConfigError::invalid(
        format!("steps.{}.operator.n", self.name),
        "broadcast needs at least one copy",
      ));
    }
    self.config.validate(&self.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PIPELINE: &str = r#"{
    "name": "subtopics",
    "input": { "topic": "rust" },
    "steps": [
      {
        "name": "generate",
        "template": "List subtopics of {{ topic }}",
        "operator": { "kind": "scatter" },
        "config": { "accepted_executors": ["openai"] }
      },
      {
        "name": "expand",
        "template": "Write about {{ subtopic }}",
        "config": { "accepted_executors": ["openai"], "min_compute": 0.5 }
      }
    ]
  }"#;

  #[test]
  fn test_parse_pipeline_def() {
    let def: PipelineDef = serde_json::from_str(PIPELINE).unwrap();

    assert_eq!(def.steps.len(), 2);
    assert_eq!(def.steps[0].operator.kind, OperatorKind::Scatter);
    assert_eq!(def.steps[1].operator.kind, OperatorKind::Forward);
    assert_eq!(def.steps[1].config.min_compute, Some(0.5));
    assert!(def.validate().is_ok());
  }

  #[test]
  fn test_duplicate_step_names() {
    let mut def: PipelineDef = serde_json::from_str(PIPELINE).unwrap();
    def.steps[1].name = "generate".to_string();

    let err = def.validate().unwrap_err();
    assert!(err.to_string().contains("duplicate step name 'generate'"));
  }

  #[test]
  fn test_empty_pipeline() {
    let def = PipelineDef {
      name: "empty".to_string(),
      input: Default::default(),
      steps: vec![],
    };
    assert!(def.validate().is_err());
  }
}
