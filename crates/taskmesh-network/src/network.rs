use async_trait::async_trait;
use taskmesh_task::{ExecutorOutput, Task};

use crate::error::NetworkError;

/// Acknowledgement returned when a task has been handed to the network.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishAck {
  pub task_id: String,
  /// Executor the network picked for the task, when it reports one.
  pub assigned_executor: Option<String>,
}

/// State of a task as seen through `fetch`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
  /// No result yet.
  Pending,

  /// An executor produced a result.
  Ready(ExecutorOutput),

  /// An executor reported an error for the task.
  Error {
    message: String,
    executor_id: Option<String>,
    /// `false` when republishing the same payload cannot succeed.
    retryable: bool,
  },
}

/// Publish/fetch protocol to the remote worker pool.
///
/// Implementations must be safe to share between many concurrently polling
/// dispatch loops.
#[async_trait]
pub trait Network: Send + Sync {
  /// Schedule a task on a capable executor.
  async fn publish(&self, task: &Task) -> Result<PublishAck, NetworkError>;

  /// Idempotent read of a task's current state.
  async fn fetch(&self, task_id: &str) -> Result<FetchStatus, NetworkError>;
}
