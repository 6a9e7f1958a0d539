use std::fmt;
use std::time::Duration;

use serde::Serialize;
use taskmesh_task::ExecutorOutput;

use crate::error::DispatchError;

/// Why a task ended as [`TaskOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureCause {
  /// The executor reported an error on every attempt.
  Executor(String),
  /// The executor refused the payload; no retry was made.
  Rejected(String),
  /// The task could not be published.
  Network(String),
  Cancelled,
}

impl fmt::Display for FailureCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureCause::Executor(message) => write!(f, "executor error: {}", message),
      FailureCause::Rejected(message) => write!(f, "rejected: {}", message),
      FailureCause::Network(message) => write!(f, "network error: {}", message),
      FailureCause::Cancelled => write!(f, "cancelled"),
    }
  }
}

/// Terminal outcome of dispatching one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
  Completed { output: ExecutorOutput },
  Failed { cause: FailureCause },
  TimedOut,
}

/// Result of [`TaskDispatcher::dispatch`](crate::TaskDispatcher::dispatch).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
  /// Id of the task as originally submitted.
  pub task_id: String,

  /// Every task id used, one per publish attempt, in attempt order.
  pub attempt_ids: Vec<String>,

  pub outcome: TaskOutcome,

  /// Publish-to-result time of the attempt that completed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub roundtrip: Option<Duration>,
}

impl TaskResult {
  pub fn attempts(&self) -> usize {
    self.attempt_ids.len()
  }

  pub fn is_completed(&self) -> bool {
    matches!(self.outcome, TaskOutcome::Completed { .. })
  }

  pub fn output(&self) -> Option<&ExecutorOutput> {
    match &self.outcome {
      TaskOutcome::Completed { output } => Some(output),
      _ => None,
    }
  }

  pub fn into_output(self) -> Result<ExecutorOutput, DispatchError> {
    let attempts = self.attempts();
    let task_id = self.task_id;
    match self.outcome {
      TaskOutcome::Completed { output } => Ok(output),
      TaskOutcome::TimedOut => Err(DispatchError::Timeout { task_id, attempts }),
      TaskOutcome::Failed {
        cause: FailureCause::Cancelled,
      } => Err(DispatchError::Cancelled { task_id }),
      TaskOutcome::Failed {
        cause: FailureCause::Rejected(message),
      } => Err(DispatchError::Rejected { task_id, message }),
      TaskOutcome::Failed { cause } => Err(DispatchError::TaskFailed {
        task_id,
        attempts,
        reason: cause.to_string(),
      }),
    }
  }
}
