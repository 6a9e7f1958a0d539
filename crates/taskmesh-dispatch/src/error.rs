use thiserror::Error;

/// Terminal dispatch failures, as surfaced to callers that need an output.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
  /// The last attempt's deadline passed without a result.
  #[error("task '{task_id}' timed out after {attempts} attempt(s)")]
  Timeout { task_id: String, attempts: usize },

  /// Retries were exhausted or the failure was not retryable.
  #[error("task '{task_id}' failed after {attempts} attempt(s): {reason}")]
  TaskFailed {
    task_id: String,
    attempts: usize,
    reason: String,
  },

  /// The executor refused the payload itself.
  #[error("task '{task_id}' rejected by executor: {message}")]
  Rejected { task_id: String, message: String },

  /// Dispatch was cancelled before the task resolved.
  #[error("task '{task_id}' cancelled")]
  Cancelled { task_id: String },
}
