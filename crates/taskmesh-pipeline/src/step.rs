//! Steps and their per-execution state.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use taskmesh_config::{StepConfig, StepDef};
use taskmesh_dispatch::{TaskOutcome, TaskResult};
use taskmesh_task::{ExecutorCatalog, ExecutorOutput, TaskInput};

use crate::error::{CompositionError, PipelineError};
use crate::operator::CompositionOperator;
use crate::template::{PromptTemplate, StepTemplate};

/// A named, reusable unit of a pipeline.
///
/// Steps hold no execution state. Each time a pipeline runs a step, the
/// executor records what happened in a [`StepExecutionState`].
#[derive(Clone)]
pub struct Step {
  name: String,
  template: Arc<dyn StepTemplate>,
  accepted_executors: Vec<String>,
  operator: CompositionOperator,
  min_compute: Option<f64>,
  max_retries: Option<u32>,
  timeout: Option<Duration>,
}

impl Step {
  pub fn builder(name: impl Into<String>, template: impl StepTemplate + 'static) -> StepBuilder {
    StepBuilder::new(name, Arc::new(template))
  }

  /// Build a prompt step from its definition, resolving executor tags
  /// through `catalog`.
  pub fn from_def(def: &StepDef, catalog: &ExecutorCatalog) -> Result<Step, PipelineError> {
    def
      .validate()
      .map_err(|e| PipelineError::validation(e.to_string()))?;

    let mut template = PromptTemplate::new(&def.name, &def.template)
      .map_err(|e| PipelineError::validation(e.to_string()))?;
    if !def.input_keys.is_empty() {
      template = template.with_keys(def.input_keys.clone());
    }

    let executors = catalog
      .resolve(&def.config.accepted_executors, def.config.function_calling)
      .map_err(|e| PipelineError::validation(format!("step '{}': {}", def.name, e)))?;

    StepBuilder::new(&def.name, Arc::new(template))
      .executors(executors)
      .operator(CompositionOperator::from_def(&def.operator))
      .config(&def.config)
      .build()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn template(&self) -> &dyn StepTemplate {
    self.template.as_ref()
  }

  pub fn input_keys(&self) -> Vec<String> {
    self.template.input_keys()
  }

  pub fn accepted_executors(&self) -> &[String] {
    &self.accepted_executors
  }

  pub fn operator(&self) -> &CompositionOperator {
    &self.operator
  }

  pub fn min_compute(&self) -> Option<f64> {
    self.min_compute
  }

  pub fn max_retries(&self) -> Option<u32> {
    self.max_retries
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// Successes required out of `total` tasks before the stage may proceed.
  ///
  /// Without `min_compute` a single success is enough. The fraction is
  /// taken in parts per million so that exact thresholds like 7 of 25 at
  /// 0.28 are not pushed up by float error.
  pub fn required_successes(&self, total: usize) -> usize {
    const SCALE: u128 = 1_000_000;

    match self.min_compute {
      Some(fraction) => {
        let parts = (fraction * SCALE as f64).round() as u128;
        let required = (parts * total as u128).div_ceil(SCALE) as usize;
        required.clamp(1, total.max(1))
      }
      None => 1,
    }
  }
}

impl std::fmt::Debug for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Step")
      .field("name", &self.name)
      .field("input_keys", &self.input_keys())
      .field("accepted_executors", &self.accepted_executors)
      .field("operator", &self.operator)
      .field("min_compute", &self.min_compute)
      .finish()
  }
}

/// Fluent construction of a [`Step`].
pub struct StepBuilder {
  name: String,
  template: Arc<dyn StepTemplate>,
  accepted_executors: Vec<String>,
  operator: CompositionOperator,
  min_compute: Option<f64>,
  max_retries: Option<u32>,
  timeout: Option<Duration>,
}

impl StepBuilder {
  pub fn new(name: impl Into<String>, template: Arc<dyn StepTemplate>) -> Self {
    Self {
      name: name.into(),
      template,
      accepted_executors: Vec::new(),
      operator: CompositionOperator::Forward,
      min_compute: None,
      max_retries: None,
      timeout: None,
    }
  }

  pub fn executors<I, S>(mut self, executors: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.accepted_executors = executors.into_iter().map(Into::into).collect();
    self
  }

  /// Split this step's list output into one next-step input per item.
  pub fn scatter(mut self) -> Self {
    self.operator = CompositionOperator::Scatter;
    self
  }

  /// Copy this step's output into `n` next-step inputs.
  pub fn broadcast(mut self, n: usize) -> Self {
    self.operator = CompositionOperator::Broadcast { n };
    self
  }

  /// Collect all outputs of this step into a single next-step input.
  pub fn aggregate(mut self) -> Self {
    self.operator = CompositionOperator::Aggregate;
    self
  }

  pub fn custom<F>(mut self, compose: F) -> Self
  where
    F: Fn(&StepExecutionState) -> Result<Vec<TaskInput>, CompositionError> + Send + Sync + 'static,
  {
    self.operator = CompositionOperator::custom(compose);
    self
  }

  pub fn operator(mut self, operator: CompositionOperator) -> Self {
    self.operator = operator;
    self
  }

  /// Fraction of this step's tasks that must succeed, 0.0 to 1.0.
  pub fn min_compute(mut self, fraction: f64) -> Self {
    self.min_compute = Some(fraction);
    self
  }

  pub fn max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = Some(max_retries);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Apply the optional settings of a [`StepConfig`].
  ///
  /// Executor tags are not copied; they need resolving through a catalog.
  pub fn config(mut self, config: &StepConfig) -> Self {
    self.min_compute = config.min_compute;
    self.max_retries = config.max_retries;
    self.timeout = config.timeout_ms.map(Duration::from_millis);
    self
  }

  pub fn build(self) -> Result<Step, PipelineError> {
    if self.name.is_empty() {
      return Err(PipelineError::validation("step name must not be empty"));
    }
    if self.accepted_executors.is_empty() {
      return Err(PipelineError::validation(format!(
        "step '{}' has no accepted executors",
        self.name
      )));
    }
    if let Some(fraction) = self.min_compute.filter(|f| !(0.0..=1.0).contains(f)) {
      return Err(PipelineError::validation(format!(
        "step '{}' min_compute {} is outside 0.0..=1.0",
        self.name, fraction
      )));
    }
    if matches!(self.operator, CompositionOperator::Broadcast { n: 0 }) {
      return Err(PipelineError::validation(format!(
        "step '{}' broadcasts to zero inputs",
        self.name
      )));
    }

    Ok(Step {
      name: self.name,
      template: self.template,
      accepted_executors: self.accepted_executors,
      operator: self.operator,
      min_compute: self.min_compute,
      max_retries: self.max_retries,
      timeout: self.timeout,
    })
  }
}

/// Lifecycle of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
  Running,
  Completed,
  Failed,
}

/// Terminal state of one task of a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
  Completed { output: ExecutorOutput },
  Failed { reason: String },
  TimedOut,
}

/// One task spawned by a stage, tied back to the input it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
  pub input_index: usize,
  /// `None` when no task could be built for the input.
  pub task_id: Option<String>,
  pub attempt_ids: Vec<String>,
  pub status: TaskStatus,
  /// Publish-to-result time of the completing attempt.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub roundtrip_ms: Option<u64>,
}

impl TaskRecord {
  pub(crate) fn from_result(input_index: usize, result: TaskResult) -> Self {
    let status = match result.outcome {
      TaskOutcome::Completed { output } => TaskStatus::Completed { output },
      TaskOutcome::Failed { cause } => TaskStatus::Failed {
        reason: cause.to_string(),
      },
      TaskOutcome::TimedOut => TaskStatus::TimedOut,
    };
    Self {
      input_index,
      task_id: Some(result.task_id),
      attempt_ids: result.attempt_ids,
      status,
      roundtrip_ms: result.roundtrip.map(|roundtrip| roundtrip.as_millis() as u64),
    }
  }

  pub(crate) fn not_built(input_index: usize, reason: String) -> Self {
    Self {
      input_index,
      task_id: None,
      attempt_ids: Vec::new(),
      status: TaskStatus::Failed { reason },
      roundtrip_ms: None,
    }
  }

  pub fn output(&self) -> Option<&ExecutorOutput> {
    match &self.status {
      TaskStatus::Completed { output } => Some(output),
      _ => None,
    }
  }
}

/// What happened during one execution of a step.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionState {
  pub stage_index: usize,
  pub step_name: String,
  pub inputs: Vec<TaskInput>,
  /// One record per input, ordered by input index.
  pub tasks: Vec<TaskRecord>,
  pub status: StageStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepExecutionState {
  pub fn new(stage_index: usize, step_name: impl Into<String>, inputs: Vec<TaskInput>) -> Self {
    Self {
      stage_index,
      step_name: step_name.into(),
      inputs,
      tasks: Vec::new(),
      status: StageStatus::Running,
      error: None,
    }
  }

  /// Successful outputs in input order.
  pub fn outputs(&self) -> impl Iterator<Item = &ExecutorOutput> {
    self.tasks.iter().filter_map(TaskRecord::output)
  }

  /// Raw output data in input order.
  pub fn output_values(&self) -> Vec<Value> {
    self.outputs().map(|output| output.data.clone()).collect()
  }

  pub fn succeeded(&self) -> usize {
    self.outputs().count()
  }

  pub fn failed(&self) -> usize {
    self.tasks.len() - self.succeeded()
  }
}
