use serde::{Deserialize, Serialize};

/// The value an executor produced for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
  /// Address or id of the executor that ran the task.
  pub executor_id: String,

  /// Raw result. Usually a string for model executors.
  pub data: serde_json::Value,
}

impl ExecutorOutput {
  pub fn new(executor_id: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      executor_id: executor_id.into(),
      data,
    }
  }
}
