//! Payload construction for steps.
//!
//! A [`StepTemplate`] turns one [`TaskInput`] into the opaque payload that
//! is published to the network, and optionally turns a raw executor output
//! back into a domain value when a pipeline surfaces its final result.

use minijinja::Environment;
use serde_json::{Value, json};
use taskmesh_task::{ExecutorOutput, TaskInput};

use crate::error::TemplateError;

/// Builds payloads from typed input and parses typed output from results.
///
/// `create_payload` must be deterministic: retries republish whatever it
/// returned for the same input.
pub trait StepTemplate: Send + Sync {
  /// Keys the template reads from its input.
  fn input_keys(&self) -> Vec<String>;

  fn create_payload(&self, step: &str, input: &TaskInput) -> Result<Value, TemplateError>;

  /// Convert an executor output into the value returned to callers.
  fn parse_result(&self, output: &ExecutorOutput) -> Value {
    output.data.clone()
  }
}

/// Check that `input` carries every key in `keys`.
pub fn require_keys(step: &str, keys: &[String], input: &TaskInput) -> Result<(), TemplateError> {
  match keys.iter().find(|key| !input.contains_key(key)) {
    Some(key) => Err(TemplateError::MissingKey {
      step: step.to_string(),
      key: key.clone(),
    }),
    None => Ok(()),
  }
}

type PayloadFn = dyn Fn(&TaskInput) -> Value + Send + Sync;

/// A template backed by a closure.
pub struct FnTemplate {
  keys: Vec<String>,
  build: Box<PayloadFn>,
}

impl FnTemplate {
  pub fn new<F>(keys: &[&str], build: F) -> Self
  where
    F: Fn(&TaskInput) -> Value + Send + Sync + 'static,
  {
    Self {
      keys: keys.iter().map(|k| k.to_string()).collect(),
      build: Box::new(build),
    }
  }
}

impl StepTemplate for FnTemplate {
  fn input_keys(&self) -> Vec<String> {
    self.keys.clone()
  }

  fn create_payload(&self, step: &str, input: &TaskInput) -> Result<Value, TemplateError> {
    require_keys(step, &self.keys, input)?;
    Ok((self.build)(input))
  }
}

/// A minijinja prompt rendered with the task input as context.
///
/// The payload is `{"prompt": <rendered text>}`.
///
/// ```text
/// List five subtopics of {{ topic }} as a JSON array.
/// ```
#[derive(Debug, Clone)]
pub struct PromptTemplate {
  source: String,
  keys: Vec<String>,
}

impl PromptTemplate {
  /// Compile `source` and derive its input keys from the variables it uses.
  pub fn new(step: &str, source: impl Into<String>) -> Result<Self, TemplateError> {
    let source = source.into();
    let env = Environment::new();
    let template = env
      .template_from_str(&source)
      .map_err(|e| TemplateError::Render {
        step: step.to_string(),
        message: e.to_string(),
      })?;

    let mut keys: Vec<String> = template.undeclared_variables(false).into_iter().collect();
    keys.sort();

    Ok(Self { source, keys })
  }

  /// Use an explicit key list instead of the derived one.
  pub fn with_keys(mut self, keys: Vec<String>) -> Self {
    self.keys = keys;
    self
  }

  pub fn source(&self) -> &str {
    &self.source
  }
}

impl StepTemplate for PromptTemplate {
  fn input_keys(&self) -> Vec<String> {
    self.keys.clone()
  }

  fn create_payload(&self, step: &str, input: &TaskInput) -> Result<Value, TemplateError> {
    require_keys(step, &self.keys, input)?;

    let env = Environment::new();
    let context = minijinja::Value::from_serialize(input.as_map());
    let prompt = env
      .render_str(&self.source, context)
      .map_err(|e| TemplateError::Render {
        step: step.to_string(),
        message: e.to_string(),
      })?;

    Ok(json!({ "prompt": prompt }))
  }

  fn parse_result(&self, output: &ExecutorOutput) -> Value {
    match &output.data {
      Value::String(text) => Value::String(text.trim().to_string()),
      other => other.clone(),
    }
  }
}
