//! Execution events and notifiers for observability.
//!
//! Events are emitted while a pipeline runs so consumers can follow
//! progress, persist state, or stream it elsewhere.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  PipelineStarted {
    pipeline_id: String,
    name: String,
    stages: usize,
  },

  /// A stage has built its tasks and is about to dispatch them.
  StageStarted {
    pipeline_id: String,
    stage_index: usize,
    step: String,
    tasks: usize,
  },

  TaskCompleted {
    pipeline_id: String,
    stage_index: usize,
    task_id: String,
    executor_id: String,
    /// Time from publishing the completing attempt to fetching its result.
    roundtrip_ms: u64,
  },

  /// A task reached a failed or timed-out terminal state.
  TaskFailed {
    pipeline_id: String,
    stage_index: usize,
    task_id: Option<String>,
    error: String,
  },

  StageCompleted {
    pipeline_id: String,
    stage_index: usize,
    succeeded: usize,
    failed: usize,
  },

  StageFailed {
    pipeline_id: String,
    stage_index: usize,
    error: String,
  },

  PipelineCompleted { pipeline_id: String },

  PipelineFailed { pipeline_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The executor calls `notify` for each event. Implementations decide what
/// to do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a stage barrier.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
