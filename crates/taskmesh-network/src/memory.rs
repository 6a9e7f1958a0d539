//! In-process worker pool.
//!
//! Every published task is answered by a caller-supplied behaviour function,
//! which decides which executor picks the task up, how long it takes, and
//! whether it succeeds. Time is read from tokio's clock so tests can run with
//! a paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskmesh_task::{ExecutorOutput, Task};
use tokio::time::Instant;
use tracing::debug;

use crate::error::NetworkError;
use crate::network::{FetchStatus, Network, PublishAck};

/// How the simulated pool answers one published task.
#[derive(Debug, Clone)]
pub enum WorkerReply {
  /// `executor` returns `data` after `after`.
  Respond {
    executor: String,
    after: Duration,
    data: serde_json::Value,
  },

  /// `executor` reports an error after `after`.
  Fail {
    executor: String,
    after: Duration,
    message: String,
    retryable: bool,
  },

  /// `executor` accepts the task and never answers.
  Silent { executor: String },
}

impl WorkerReply {
  pub fn respond(executor: impl Into<String>, after: Duration, data: serde_json::Value) -> Self {
    Self::Respond {
      executor: executor.into(),
      after,
      data,
    }
  }

  pub fn fail(executor: impl Into<String>, after: Duration, message: impl Into<String>) -> Self {
    Self::Fail {
      executor: executor.into(),
      after,
      message: message.into(),
      retryable: true,
    }
  }

  pub fn reject(executor: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Fail {
      executor: executor.into(),
      after: Duration::ZERO,
      message: message.into(),
      retryable: false,
    }
  }

  pub fn silent(executor: impl Into<String>) -> Self {
    Self::Silent {
      executor: executor.into(),
    }
  }

  fn executor(&self) -> &str {
    match self {
      WorkerReply::Respond { executor, .. }
      | WorkerReply::Fail { executor, .. }
      | WorkerReply::Silent { executor } => executor,
    }
  }

  fn delay(&self) -> Duration {
    match self {
      WorkerReply::Respond { after, .. } | WorkerReply::Fail { after, .. } => *after,
      WorkerReply::Silent { .. } => Duration::ZERO,
    }
  }
}

/// One entry of the publish log.
#[derive(Debug, Clone)]
pub struct PublishRecord {
  pub task_id: String,
  pub attempt: u32,
  pub step_name: Option<String>,
  pub payload: serde_json::Value,
  pub executor: String,
  pub published_at: Instant,
}

type Behavior = dyn Fn(&Task) -> WorkerReply + Send + Sync;

struct Scheduled {
  ready_at: Instant,
  reply: WorkerReply,
}

#[derive(Default)]
struct MemoryState {
  tasks: HashMap<String, Scheduled>,
  log: Vec<PublishRecord>,
  refuse_publishes: u32,
}

/// Simulated worker network.
#[derive(Clone)]
pub struct MemoryNetwork {
  behavior: Arc<Behavior>,
  state: Arc<Mutex<MemoryState>>,
}

impl MemoryNetwork {
  pub fn new<F>(behavior: F) -> Self
  where
    F: Fn(&Task) -> WorkerReply + Send + Sync + 'static,
  {
    Self {
      behavior: Arc::new(behavior),
      state: Arc::new(Mutex::new(MemoryState::default())),
    }
  }

  /// A pool where `executor` echoes each payload back after `after`.
  pub fn echo(executor: impl Into<String>, after: Duration) -> Self {
    let executor = executor.into();
    Self::new(move |task| WorkerReply::respond(executor.clone(), after, task.payload().clone()))
  }

  /// Make the next `count` publishes fail as if the network were unreachable.
  pub fn refuse_publishes(&self, count: u32) {
    self.lock().refuse_publishes = count;
  }

  /// Every accepted publish, in publish order.
  pub fn publish_log(&self) -> Vec<PublishRecord> {
    self.lock().log.clone()
  }

  pub fn publish_count(&self) -> usize {
    self.lock().log.len()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[async_trait]
impl Network for MemoryNetwork {
  async fn publish(&self, task: &Task) -> Result<PublishAck, NetworkError> {
    let reply = (self.behavior)(task);
    let now = Instant::now();

    let mut state = self.lock();
    if state.refuse_publishes > 0 {
      state.refuse_publishes -= 1;
      return Err(NetworkError::Unreachable {
        message: "simulated publish failure".to_string(),
      });
    }

    let executor = reply.executor().to_string();
    debug!(task_id = %task.id(), executor = %executor, "memory_published");

    state.log.push(PublishRecord {
      task_id: task.id().to_string(),
      attempt: task.attempt(),
      step_name: task.step_name().map(str::to_string),
      payload: task.payload().clone(),
      executor: executor.clone(),
      published_at: now,
    });
    state.tasks.insert(
      task.id().to_string(),
      Scheduled {
        ready_at: now + reply.delay(),
        reply,
      },
    );

    Ok(PublishAck {
      task_id: task.id().to_string(),
      assigned_executor: Some(executor),
    })
  }

  async fn fetch(&self, task_id: &str) -> Result<FetchStatus, NetworkError> {
    let state = self.lock();
    let Some(scheduled) = state.tasks.get(task_id) else {
      return Ok(FetchStatus::Pending);
    };
    if Instant::now() < scheduled.ready_at {
      return Ok(FetchStatus::Pending);
    }

    let status = match &scheduled.reply {
      WorkerReply::Respond { executor, data, .. } => {
        FetchStatus::Ready(ExecutorOutput::new(executor.clone(), data.clone()))
      }
      WorkerReply::Fail {
        executor,
        message,
        retryable,
        ..
      } => FetchStatus::Error {
        message: message.clone(),
        executor_id: Some(executor.clone()),
        retryable: *retryable,
      },
      WorkerReply::Silent { .. } => FetchStatus::Pending,
    };
    Ok(status)
  }
}
