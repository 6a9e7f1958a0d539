//! Pipeline error types.

use thiserror::Error;

/// Errors raised while turning a task input into a payload.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
  /// The input lacks a key the template needs.
  #[error("missing input '{key}' for step '{step}'")]
  MissingKey { step: String, key: String },

  /// The template could not be compiled or rendered.
  #[error("failed to render template for step '{step}': {message}")]
  Render { step: String, message: String },
}

/// Errors raised by composition operators.
#[derive(Debug, Clone, Error)]
pub enum CompositionError {
  /// A scatter input did not parse as a list.
  #[error("output is not a sequence: {value}")]
  NotASequence { value: String },

  /// An output string could not be parsed as JSON.
  #[error("invalid JSON output: {message}")]
  InvalidJson { message: String },

  /// The operator produced no input for the next stage.
  #[error("composition produced no inputs")]
  NoOutput,

  /// Error returned by a caller-supplied composer.
  #[error("{message}")]
  Custom { message: String },
}

/// Why a stage could not hand anything forward.
#[derive(Debug, Clone, Error)]
pub enum StageError {
  /// Every task of the stage failed.
  #[error("all {total} task(s) failed")]
  NoUsableOutput { total: usize },

  /// Fewer tasks succeeded than the step's `min_compute` requires.
  #[error("{succeeded} of {total} task(s) succeeded, {required} required")]
  BelowMinCompute {
    succeeded: usize,
    total: usize,
    required: usize,
  },

  #[error("composition failed: {source}")]
  Composition {
    #[source]
    source: CompositionError,
  },
}

/// Errors surfaced by pipeline construction and execution.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
  /// The pipeline is structurally invalid. Raised before anything runs.
  #[error("invalid pipeline: {message}")]
  Validation { message: String },

  /// A stage failed irrecoverably.
  #[error("stage {stage_index} ('{step}') failed: {source}")]
  StageFailed {
    stage_index: usize,
    step: String,
    #[source]
    source: StageError,
  },

  #[error("pipeline cancelled")]
  Cancelled,

  /// The pipeline ran past its configured timeout.
  #[error("pipeline exceeded its {timeout_ms}ms timeout")]
  Timeout { timeout_ms: u64 },

  /// The task running a spawned pipeline panicked or was aborted.
  #[error("pipeline task aborted: {message}")]
  Aborted { message: String },

  /// No pipeline with this id was launched by the executor.
  #[error("pipeline '{pipeline_id}' not found")]
  NotFound { pipeline_id: String },
}

impl PipelineError {
  pub(crate) fn validation(message: impl Into<String>) -> Self {
    Self::Validation {
      message: message.into(),
    }
  }
}
