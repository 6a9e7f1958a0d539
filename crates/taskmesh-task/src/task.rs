use std::time::Duration;

use tokio::time::Instant;

use crate::error::TaskError;

/// One dispatchable unit of work.
///
/// A task is immutable once built. Retrying a task produces a new task
/// through [`Task::respawn`] with a fresh id and deadline.
#[derive(Debug, Clone)]
pub struct Task {
  id: String,
  payload: serde_json::Value,
  accepted_executors: Vec<String>,
  timeout: Duration,
  deadline: Instant,
  max_retries: Option<u32>,
  pipeline_id: Option<String>,
  step_name: Option<String>,
  attempt: u32,
}

impl Task {
  /// Create a task that must finish within `timeout` from now.
  pub fn new(
    payload: serde_json::Value,
    accepted_executors: Vec<String>,
    timeout: Duration,
  ) -> Result<Self, TaskError> {
    if accepted_executors.is_empty() {
      return Err(TaskError::NoExecutors {
        reason: "a task needs at least one accepted executor".to_string(),
      });
    }

    Ok(Self {
      id: uuid::Uuid::new_v4().to_string(),
      payload,
      accepted_executors,
      timeout,
      deadline: Instant::now() + timeout,
      max_retries: None,
      pipeline_id: None,
      step_name: None,
      attempt: 0,
    })
  }

  /// Override the dispatcher's default retry count for this task.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = Some(max_retries);
    self
  }

  /// Record the pipeline stage that created this task.
  pub fn with_origin(mut self, pipeline_id: impl Into<String>, step_name: impl Into<String>) -> Self {
    self.pipeline_id = Some(pipeline_id.into());
    self.step_name = Some(step_name.into());
    self
  }

  /// The same work under a new identity, with the deadline reset.
  pub fn respawn(&self) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      deadline: Instant::now() + self.timeout,
      attempt: self.attempt + 1,
      ..self.clone()
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn payload(&self) -> &serde_json::Value {
    &self.payload
  }

  pub fn accepted_executors(&self) -> &[String] {
    &self.accepted_executors
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn deadline(&self) -> Instant {
    self.deadline
  }

  pub fn max_retries(&self) -> Option<u32> {
    self.max_retries
  }

  pub fn pipeline_id(&self) -> Option<&str> {
    self.pipeline_id.as_deref()
  }

  pub fn step_name(&self) -> Option<&str> {
    self.step_name.as_deref()
  }

  /// Zero for the first publish, incremented on every respawn.
  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  pub fn is_expired(&self) -> bool {
    Instant::now() >= self.deadline
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_task_requires_executors() {
    let err = Task::new(json!({}), vec![], Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, TaskError::NoExecutors { .. }));
  }

  #[tokio::test(start_paused = true)]
  async fn test_respawn_gets_new_identity_and_deadline() {
    let task = Task::new(
      json!({ "prompt": "hi" }),
      vec!["gpt-4o".to_string()],
      Duration::from_secs(10),
    )
    .unwrap()
    .with_max_retries(1)
    .with_origin("pipeline-1", "generate");

    tokio::time::advance(Duration::from_secs(4)).await;
    let retry = task.respawn();

    assert_ne!(retry.id(), task.id());
    assert_eq!(retry.payload(), task.payload());
    assert_eq!(retry.attempt(), 1);
    assert_eq!(retry.max_retries(), Some(1));
    assert_eq!(retry.step_name(), Some("generate"));
    assert_eq!(retry.deadline() - task.deadline(), Duration::from_secs(4));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expiry() {
    let task = Task::new(json!(null), vec!["a".to_string()], Duration::from_secs(1)).unwrap();
    assert!(!task.is_expired());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(task.is_expired());
  }
}
