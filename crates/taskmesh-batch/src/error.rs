//! Batch error types.

use taskmesh_dispatch::DispatchError;
use taskmesh_pipeline::PipelineError;
use thiserror::Error;

/// Errors that stop a batch from running at all.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
  #[error("invalid batch configuration: {message}")]
  InvalidConfig { message: String },

  /// The step could not be built from its definition.
  #[error("invalid batch step: {source}")]
  Step {
    #[source]
    source: PipelineError,
  },
}

/// Why one item of a batch produced no value.
#[derive(Debug, Clone, Error)]
pub enum BatchItemError {
  /// No payload could be built from the item's input.
  #[error("invalid input: {message}")]
  InvalidInput { message: String },

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  /// The batch was cancelled before the item was admitted.
  #[error("cancelled before dispatch")]
  NotDispatched,

  /// The task driving the item panicked or was aborted.
  #[error("item task aborted")]
  Aborted,
}
