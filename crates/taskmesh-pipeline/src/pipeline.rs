//! Pipeline definition and construction.

use std::collections::HashSet;

use serde::Serialize;
use taskmesh_config::PipelineDef;
use taskmesh_task::{ExecutorCatalog, TaskInput};
use tracing::info;

use crate::error::PipelineError;
use crate::step::Step;

/// Overall state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
  Created,
  Running,
  Completed,
  Failed,
}

impl PipelineStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// An immutable, validated sequence of steps with its root input.
#[derive(Debug, Clone)]
pub struct Pipeline {
  id: String,
  name: String,
  input: TaskInput,
  steps: Vec<Step>,
}

impl Pipeline {
  pub fn builder(name: impl Into<String>) -> PipelineBuilder {
    PipelineBuilder::new(name)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn input(&self) -> &TaskInput {
    &self.input
  }

  pub fn steps(&self) -> &[Step] {
    &self.steps
  }
}

/// Collects a root input and an ordered list of steps.
pub struct PipelineBuilder {
  name: String,
  input: TaskInput,
  steps: Vec<Step>,
}

impl PipelineBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      input: TaskInput::new(),
      steps: Vec::new(),
    }
  }

  /// Set the root input handed to the first step.
  pub fn input(mut self, input: TaskInput) -> Self {
    self.input = input;
    self
  }

  /// Append a step. Steps run in the order they are added.
  pub fn step(mut self, step: Step) -> Self {
    self.steps.push(step);
    self
  }

  /// Build a pipeline of prompt steps from a definition file.
  pub fn from_def(def: &PipelineDef, catalog: &ExecutorCatalog) -> Result<Self, PipelineError> {
    def
      .validate()
      .map_err(|e| PipelineError::validation(e.to_string()))?;

    let mut builder = Self::new(&def.name).input(TaskInput::from(def.input.clone()));
    for step_def in &def.steps {
      builder = builder.step(Step::from_def(step_def, catalog)?);
    }
    Ok(builder)
  }

  /// Validate the step sequence and freeze it into a [`Pipeline`].
  pub fn build(self) -> Result<Pipeline, PipelineError> {
    let Some(first) = self.steps.first() else {
      return Err(PipelineError::validation(format!(
        "pipeline '{}' has no steps",
        self.name
      )));
    };

    let mut names = HashSet::new();
    for step in &self.steps {
      if !names.insert(step.name()) {
        return Err(PipelineError::validation(format!(
          "duplicate step name '{}'",
          step.name()
        )));
      }
    }

    let missing: Vec<String> = first
      .input_keys()
      .into_iter()
      .filter(|key| !self.input.contains_key(key))
      .collect();
    if !missing.is_empty() {
      return Err(PipelineError::validation(format!(
        "root input is missing {:?} required by step '{}'",
        missing,
        first.name()
      )));
    }

    for pair in self.steps.windows(2) {
      let (producer, consumer) = (&pair[0], &pair[1]);
      if producer.operator().needs_single_key() && consumer.input_keys().len() > 1 {
        return Err(PipelineError::validation(format!(
          "step '{}' uses {} but step '{}' takes {} input keys; use a custom operator",
          producer.name(),
          producer.operator().name(),
          consumer.name(),
          consumer.input_keys().len()
        )));
      }
    }

    let pipeline = Pipeline {
      id: uuid::Uuid::new_v4().to_string(),
      name: self.name,
      input: self.input,
      steps: self.steps,
    };
    info!(
      pipeline_id = %pipeline.id,
      name = %pipeline.name,
      stages = pipeline.steps.len(),
      "pipeline_built"
    );
    Ok(pipeline)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use taskmesh_config::ExecutorCatalogDef;

  use super::*;
  use crate::step::StepBuilder;
  use crate::template::FnTemplate;

  fn step(name: &str, keys: &[&str]) -> StepBuilder {
    Step::builder(name, FnTemplate::new(keys, |input| input.clone().into_value())).executors(["gpt-4o"])
  }

  #[test]
  fn test_build_valid_pipeline() {
    let pipeline = Pipeline::builder("subtopics")
      .input(TaskInput::new().with("topic", "rust"))
      .step(step("generate", &["topic"]).scatter().build().unwrap())
      .step(step("expand", &["subtopic"]).build().unwrap())
      .build()
      .unwrap();

    assert_eq!(pipeline.steps().len(), 2);
    assert!(!pipeline.id().is_empty());
  }

  #[test]
  fn test_empty_pipeline_rejected() {
    let err = Pipeline::builder("empty").build().unwrap_err();
    assert!(err.to_string().contains("has no steps"));
  }

  #[test]
  fn test_root_input_must_cover_first_step() {
    let err = Pipeline::builder("p")
      .input(TaskInput::new().with("subject", "rust"))
      .step(step("generate", &["topic"]).build().unwrap())
      .build()
      .unwrap_err();
    assert!(err.to_string().contains("\"topic\""));
  }

  #[test]
  fn test_duplicate_names_rejected() {
    let err = Pipeline::builder("p")
      .input(TaskInput::new().with("topic", "rust"))
      .step(step("generate", &["topic"]).build().unwrap())
      .step(step("generate", &["result"]).build().unwrap())
      .build()
      .unwrap_err();
    assert!(err.to_string().contains("duplicate step name"));
  }

  #[test]
  fn test_scatter_into_multi_key_step_rejected() {
    let err = Pipeline::builder("p")
      .input(TaskInput::new().with("topic", "rust"))
      .step(step("generate", &["topic"]).scatter().build().unwrap())
      .step(step("expand", &["subtopic", "style"]).build().unwrap())
      .build()
      .unwrap_err();
    assert!(err.to_string().contains("use a custom operator"));
  }

  #[test]
  fn test_from_def_resolves_groups() {
    let def: PipelineDef = serde_json::from_value(json!({
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
          "config": { "accepted_executors": ["gemma2:9b"], "max_retries": 0 }
        }
      ]
    }))
    .unwrap();

    let mut catalog = ExecutorCatalogDef::default();
    catalog.groups.insert(
      "openai".to_string(),
      vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
    );

    let pipeline = PipelineBuilder::from_def(&def, &ExecutorCatalog::new(&catalog))
      .unwrap()
      .build()
      .unwrap();

    assert_eq!(pipeline.steps()[0].accepted_executors(), ["gpt-4o", "gpt-4o-mini"]);
    assert_eq!(pipeline.steps()[1].input_keys(), vec!["subtopic"]);
    assert_eq!(pipeline.steps()[1].max_retries(), Some(0));
  }
}
