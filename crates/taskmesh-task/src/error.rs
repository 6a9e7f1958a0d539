use thiserror::Error;

/// Errors that can occur while building a task.
#[derive(Debug, Error)]
pub enum TaskError {
  /// No executor is left to run the task.
  #[error("no executors available: {reason}")]
  NoExecutors { reason: String },

  /// A value could not be turned into a task input.
  #[error("invalid task input: {message}")]
  InvalidInput { message: String },
}
