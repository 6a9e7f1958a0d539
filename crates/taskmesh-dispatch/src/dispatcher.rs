//! Publish/poll loop with timeout and retry.

use std::sync::Arc;
use std::time::Duration;

use taskmesh_config::DispatchConfig;
use taskmesh_network::{FetchStatus, Network};
use taskmesh_task::{ExecutorOutput, Task};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::health::HealthTracker;
use crate::result::{FailureCause, TaskOutcome, TaskResult};

/// Outcome of a single publish attempt.
enum Attempt {
  /// Completed, with the time from publish to the result being fetched.
  Done { output: ExecutorOutput, roundtrip: Duration },
  Failed { cause: FailureCause, retryable: bool },
  TimedOut,
  Cancelled,
}

/// Dispatches tasks to a [`Network`] and waits for their results.
///
/// Cloning is cheap; clones share the network client and the health tracker.
#[derive(Clone)]
pub struct TaskDispatcher {
  network: Arc<dyn Network>,
  tracker: HealthTracker,
  config: DispatchConfig,
}

impl TaskDispatcher {
  pub fn new(network: Arc<dyn Network>, config: DispatchConfig) -> Self {
    Self::with_tracker(network, config, HealthTracker::new())
  }

  pub fn with_tracker(
    network: Arc<dyn Network>,
    config: DispatchConfig,
    tracker: HealthTracker,
  ) -> Self {
    Self {
      network,
      tracker,
      config,
    }
  }

  pub fn config(&self) -> &DispatchConfig {
    &self.config
  }

  pub fn tracker(&self) -> &HealthTracker {
    &self.tracker
  }

  /// Run `task` to a terminal outcome.
  ///
  /// Timed-out attempts and retryable executor or network errors are
  /// republished as a new task, at most `max_retries` times. The outcome of
  /// the last attempt is the one returned. Network errors that would fail
  /// the same way again end the task at once.
  #[instrument(
    name = "dispatch",
    skip(self, task, cancel),
    fields(task_id = %task.id())
  )]
  pub async fn dispatch(&self, task: Task, cancel: CancellationToken) -> TaskResult {
    self.tracker.purge_expired();

    let task_id = task.id().to_string();
    let max_retries = task.max_retries().unwrap_or(self.config.max_retries);
    let mut attempt_ids = Vec::new();
    let mut current = task;

    loop {
      attempt_ids.push(current.id().to_string());
      let retries_left = attempt_ids.len() <= max_retries as usize;

      let (outcome, executor) = self.run_attempt(&current, retries_left, &cancel).await;

      let failure = match outcome {
        Attempt::Done { output, roundtrip } => {
          info!(
            task_id = %task_id,
            attempt_id = %current.id(),
            executor = %output.executor_id,
            attempts = attempt_ids.len(),
            roundtrip_ms = roundtrip.as_millis() as u64,
            "task_completed"
          );
          return TaskResult {
            task_id,
            attempt_ids,
            outcome: TaskOutcome::Completed { output },
            roundtrip: Some(roundtrip),
          };
        }
        Attempt::Cancelled => {
          warn!(task_id = %task_id, "task cancelled");
          return TaskResult {
            task_id,
            attempt_ids,
            outcome: TaskOutcome::Failed {
              cause: FailureCause::Cancelled,
            },
            roundtrip: None,
          };
        }
        Attempt::Failed {
          cause,
          retryable: false,
        } => {
          warn!(task_id = %task_id, cause = %cause, "task_failed");
          return TaskResult {
            task_id,
            attempt_ids,
            outcome: TaskOutcome::Failed { cause },
            roundtrip: None,
          };
        }
        Attempt::Failed { cause, .. } => TaskOutcome::Failed { cause },
        Attempt::TimedOut => TaskOutcome::TimedOut,
      };

      if !retries_left {
        warn!(
          task_id = %task_id,
          attempts = attempt_ids.len(),
          outcome = ?failure,
          "task_failed"
        );
        return TaskResult {
          task_id,
          attempt_ids,
          outcome: failure,
          roundtrip: None,
        };
      }

      let retry = attempt_ids.len() as u32;
      let backoff = self.config.backoff_for(retry);
      let avoided = executor.filter(|address| self.tracker.is_blacklisted(address));
      warn!(
        task_id = %task_id,
        attempt_id = %current.id(),
        retry,
        backoff_ms = backoff.as_millis() as u64,
        blacklisted_executor = ?avoided,
        outcome = ?failure,
        "task_retrying"
      );

      tokio::select! {
        _ = cancel.cancelled() => {
          return TaskResult {
            task_id,
            attempt_ids,
            outcome: TaskOutcome::Failed { cause: FailureCause::Cancelled },
            roundtrip: None,
          };
        }
        _ = tokio::time::sleep(backoff) => {}
      }

      current = current.respawn();
    }
  }

  /// Dispatch all tasks concurrently. Results are in input order.
  pub async fn dispatch_many(&self, tasks: Vec<Task>, cancel: CancellationToken) -> Vec<TaskResult> {
    let handles: Vec<_> = tasks
      .into_iter()
      .map(|task| {
        let dispatcher = self.clone();
        let cancel = cancel.clone();
        let task_id = task.id().to_string();
        let handle = tokio::spawn(async move { dispatcher.dispatch(task, cancel).await });
        (task_id, handle)
      })
      .collect();

    let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let joined = futures::future::join_all(handles).await;

    ids
      .into_iter()
      .zip(joined)
      .map(|(task_id, joined)| match joined {
        Ok(result) => result,
        Err(e) => TaskResult {
          attempt_ids: vec![task_id.clone()],
          task_id,
          outcome: TaskOutcome::Failed {
            cause: FailureCause::Executor(format!("dispatch task panicked: {}", e)),
          },
          roundtrip: None,
        },
      })
      .collect()
  }

  /// Publish once and poll until a result, an error, the deadline, or
  /// cancellation. Also returns the executor the network assigned.
  async fn run_attempt(
    &self,
    task: &Task,
    retries_left: bool,
    cancel: &CancellationToken,
  ) -> (Attempt, Option<String>) {
    let ack = tokio::select! {
      _ = cancel.cancelled() => return (Attempt::Cancelled, None),
      ack = self.network.publish(task) => ack,
    };

    let executor = match ack {
      Ok(ack) => ack.assigned_executor,
      Err(e) => {
        let retryable = e.is_retryable();
        warn!(task_id = %task.id(), error = %e, retryable, "task publish failed");
        let attempt = Attempt::Failed {
          cause: FailureCause::Network(e.to_string()),
          retryable,
        };
        return (attempt, None);
      }
    };

    info!(
      task_id = %task.id(),
      attempt = task.attempt(),
      executor = ?executor,
      executors = ?task.accepted_executors(),
      "task_published"
    );

    // Work landing on an executor that is already known to be slow is
    // abandoned at the silence window while retries remain.
    let suspect = retries_left
      && executor
        .as_deref()
        .is_some_and(|address| self.tracker.is_blacklisted(address));

    let published_at = Instant::now();
    let deadline = tokio::time::sleep_until(task.deadline());
    tokio::pin!(deadline);
    let mut flagged_slow = false;
    // Set once the network confirms the task is queued on the executor.
    // Without it a deadline says nothing about the executor's health.
    let mut seen_pending = false;

    loop {
      let poll = async {
        tokio::time::sleep(self.config.poll_interval()).await;
        self.network.fetch(task.id()).await
      };

      let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => return (Attempt::Cancelled, executor),
        _ = &mut deadline => {
          if let Some(address) = executor.as_ref().filter(|_| seen_pending) {
            self.tracker.blacklist(address, self.config.blacklist_duration());
          }
          warn!(task_id = %task.id(), executor = ?executor, "task timed out");
          return (Attempt::TimedOut, executor);
        }
        status = poll => status,
      };

      match status {
        Ok(FetchStatus::Ready(output)) => {
          let attempt = Attempt::Done {
            output,
            roundtrip: published_at.elapsed(),
          };
          return (attempt, executor);
        }
        Ok(FetchStatus::Error {
          message,
          executor_id,
          retryable,
        }) => {
          warn!(
            task_id = %task.id(),
            executor = ?executor_id.as_ref().or(executor.as_ref()),
            error = %message,
            retryable,
            "executor reported error"
          );
          let cause = if retryable {
            FailureCause::Executor(message)
          } else {
            FailureCause::Rejected(message)
          };
          return (Attempt::Failed { cause, retryable }, executor_id.or(executor));
        }
        Ok(FetchStatus::Pending) => {
          seen_pending = true;
          if !flagged_slow && published_at.elapsed() >= self.config.silence_window() {
            flagged_slow = true;
            if let Some(address) = &executor {
              warn!(task_id = %task.id(), executor = %address, "executor silent, blacklisting");
              self.tracker.blacklist(address, self.config.blacklist_duration());
            }
            if suspect {
              return (Attempt::TimedOut, executor);
            }
          }
        }
        Err(e) if e.is_retryable() => {
          debug!(task_id = %task.id(), error = %e, "fetch failed, polling again");
        }
        Err(e) => {
          warn!(task_id = %task.id(), error = %e, "task fetch failed");
          let attempt = Attempt::Failed {
            cause: FailureCause::Network(e.to_string()),
            retryable: false,
          };
          return (attempt, executor);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;
  use taskmesh_network::{MemoryNetwork, WorkerReply};

  use super::*;

  fn config() -> DispatchConfig {
    DispatchConfig {
      poll_interval_ms: 100,
      task_timeout_ms: 1_000,
      silence_window_ms: 500,
      blacklist_duration_ms: 10_000,
      max_retries: 2,
      retry_backoff_ms: 50,
      ..Default::default()
    }
  }

  fn task(timeout: Duration) -> Task {
    Task::new(json!({ "prompt": "hi" }), vec!["gpt-4o".to_string()], timeout).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn test_completed_on_first_attempt() {
    let network = MemoryNetwork::echo("node-a", Duration::from_millis(250));
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());

    let task = task(Duration::from_secs(1));
    let id = task.id().to_string();
    let result = dispatcher.dispatch(task, CancellationToken::new()).await;

    assert_eq!(result.task_id, id);
    assert_eq!(result.attempt_ids, vec![id]);
    assert_eq!(
      result.output().map(|o| o.executor_id.as_str()),
      Some("node-a")
    );
    assert_eq!(network.publish_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_silent_executor_times_out_and_is_blacklisted() {
    let network = MemoryNetwork::new(|_| WorkerReply::silent("node-slow"));
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());

    let result = dispatcher
      .dispatch(task(Duration::from_secs(1)).with_max_retries(0), CancellationToken::new())
      .await;

    assert_eq!(result.outcome, TaskOutcome::TimedOut);
    assert!(dispatcher.tracker().is_blacklisted("node-slow"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retryable_error_is_republished() {
    let network = MemoryNetwork::new(|task| {
      if task.attempt() == 0 {
        WorkerReply::fail("node-a", Duration::from_millis(100), "model overloaded")
      } else {
        WorkerReply::respond("node-b", Duration::from_millis(100), json!("done"))
      }
    });
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());

    let result = dispatcher
      .dispatch(task(Duration::from_secs(1)), CancellationToken::new())
      .await;

    assert!(result.is_completed());
    assert_eq!(result.attempts(), 2);
    assert_ne!(result.attempt_ids[0], result.attempt_ids[1]);
    assert_eq!(network.publish_log()[1].attempt, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rejected_payload_is_not_retried() {
    let network = MemoryNetwork::new(|_| WorkerReply::reject("node-a", "Invalid prompt"));
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());

    let result = dispatcher
      .dispatch(task(Duration::from_secs(1)), CancellationToken::new())
      .await;

    assert_eq!(
      result.outcome,
      TaskOutcome::Failed {
        cause: FailureCause::Rejected("Invalid prompt".to_string())
      }
    );
    assert_eq!(network.publish_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_publish_failure_counts_as_attempt() {
    let network = MemoryNetwork::echo("node-a", Duration::ZERO);
    network.refuse_publishes(1);
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());

    let result = dispatcher
      .dispatch(task(Duration::from_secs(1)), CancellationToken::new())
      .await;

    assert!(result.is_completed());
    assert_eq!(result.attempts(), 2);
    assert_eq!(network.publish_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_dispatch() {
    let network = MemoryNetwork::new(|_| WorkerReply::silent("node-a"));
    let dispatcher = TaskDispatcher::new(Arc::new(network), config());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
      let dispatcher = dispatcher.clone();
      let cancel = cancel.clone();
      async move { dispatcher.dispatch(task(Duration::from_secs(60)), cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let result = handle.await.unwrap();
    assert_eq!(
      result.outcome,
      TaskOutcome::Failed {
        cause: FailureCause::Cancelled
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_task_on_blacklisted_executor_is_abandoned_early() {
    let network = MemoryNetwork::new(|task| {
      if task.attempt() == 0 {
        WorkerReply::silent("node-slow")
      } else {
        WorkerReply::respond("node-b", Duration::from_millis(100), json!("ok"))
      }
    });
    let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), config());
    dispatcher
      .tracker()
      .blacklist("node-slow", Duration::from_secs(60));

    let started = Instant::now();
    let result = dispatcher
      .dispatch(task(Duration::from_secs(30)), CancellationToken::new())
      .await;

    assert!(result.is_completed());
    assert!(started.elapsed() < Duration::from_secs(2));
  }
}
