//! Pipeline executor.
//!
//! Runs the stages of a [`Pipeline`] strictly in order. Each stage builds one
//! task per input, dispatches them concurrently, waits for every task to
//! settle, and composes the next stage's inputs from the successful outputs.
//!
//! Progress is kept in a lock-guarded [`PipelineSnapshot`] per pipeline so
//! callers can poll without blocking the run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use taskmesh_config::PipelineConfig;
use taskmesh_dispatch::TaskDispatcher;
use taskmesh_task::{Task, TaskInput};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{PipelineError, StageError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::operator::DEFAULT_KEY;
use crate::pipeline::{Pipeline, PipelineStatus};
use crate::step::{StageStatus, Step, StepExecutionState, TaskRecord, TaskStatus};

/// Point-in-time view of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
  pub pipeline_id: String,
  pub name: String,
  pub status: PipelineStatus,
  /// Index of the stage currently running, or the last one that ran.
  pub current_stage: Option<usize>,
  pub stages: Vec<StepExecutionState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<Vec<Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed_stage: Option<usize>,
}

impl PipelineSnapshot {
  fn new(pipeline: &Pipeline) -> Self {
    Self {
      pipeline_id: pipeline.id().to_string(),
      name: pipeline.name().to_string(),
      status: PipelineStatus::Created,
      current_stage: None,
      stages: Vec::new(),
      output: None,
      error: None,
      failed_stage: None,
    }
  }
}

/// Result of a completed pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
  pub pipeline_id: String,
  /// The final stage's outputs, composed by its operator.
  pub output: Vec<Value>,
  pub stages: Vec<StepExecutionState>,
}

type SharedSnapshot = Arc<RwLock<PipelineSnapshot>>;

fn read(progress: &SharedSnapshot) -> PipelineSnapshot {
  progress.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn update(progress: &SharedSnapshot, apply: impl FnOnce(&mut PipelineSnapshot)) {
  let mut snapshot = progress.write().unwrap_or_else(|e| e.into_inner());
  apply(&mut snapshot);
}

/// A pipeline running in the background.
pub struct PipelineHandle {
  pipeline_id: String,
  progress: SharedSnapshot,
  join: JoinHandle<Result<PipelineRun, PipelineError>>,
}

impl PipelineHandle {
  pub fn pipeline_id(&self) -> &str {
    &self.pipeline_id
  }

  /// Current state of the run. Never blocks.
  pub fn poll(&self) -> PipelineSnapshot {
    read(&self.progress)
  }

  /// Wait for the run to finish.
  pub async fn wait(self) -> Result<PipelineRun, PipelineError> {
    self.join.await.map_err(|e| PipelineError::Aborted {
      message: e.to_string(),
    })?
  }
}

type Registry = Arc<RwLock<HashMap<String, SharedSnapshot>>>;

/// Executes pipelines against a [`TaskDispatcher`].
#[derive(Clone)]
pub struct PipelineExecutor {
  dispatcher: TaskDispatcher,
  config: PipelineConfig,
  notifier: Arc<dyn ExecutionNotifier>,
  registry: Registry,
}

impl PipelineExecutor {
  pub fn new(dispatcher: TaskDispatcher, config: PipelineConfig) -> Self {
    Self {
      dispatcher,
      config,
      notifier: Arc::new(NoopNotifier),
      registry: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn dispatcher(&self) -> &TaskDispatcher {
    &self.dispatcher
  }

  /// Run `pipeline` to completion.
  ///
  /// The run is not registered: its progress is only visible through the
  /// returned [`PipelineRun`] and the notifier.
  #[instrument(
    name = "pipeline_execute",
    skip(self, pipeline, cancel),
    fields(pipeline_id = %pipeline.id(), name = %pipeline.name())
  )]
  pub async fn execute(
    &self,
    pipeline: &Pipeline,
    cancel: CancellationToken,
  ) -> Result<PipelineRun, PipelineError> {
    let progress = Arc::new(RwLock::new(PipelineSnapshot::new(pipeline)));
    self.run(pipeline, cancel, &progress).await
  }

  /// Run `pipeline` on a background task and return a handle to it.
  ///
  /// The run stays pollable by id until [`forget`](Self::forget) is called,
  /// including after it finishes.
  pub fn spawn(&self, pipeline: Pipeline, cancel: CancellationToken) -> PipelineHandle {
    let progress = self.register(&pipeline);
    let pipeline_id = pipeline.id().to_string();

    let executor = self.clone();
    let shared = progress.clone();
    let join = tokio::spawn(async move { executor.run(&pipeline, cancel, &shared).await });

    PipelineHandle {
      pipeline_id,
      progress,
      join,
    }
  }

  /// Current state of a pipeline started with [`spawn`](Self::spawn).
  pub fn poll(&self, pipeline_id: &str) -> Result<PipelineSnapshot, PipelineError> {
    let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
    registry
      .get(pipeline_id)
      .map(read)
      .ok_or_else(|| PipelineError::NotFound {
        pipeline_id: pipeline_id.to_string(),
      })
  }

  /// Drop the registry entry for a pipeline. Returns whether one existed.
  pub fn forget(&self, pipeline_id: &str) -> bool {
    let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
    registry.remove(pipeline_id).is_some()
  }

  fn register(&self, pipeline: &Pipeline) -> SharedSnapshot {
    let progress = Arc::new(RwLock::new(PipelineSnapshot::new(pipeline)));
    let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
    registry.insert(pipeline.id().to_string(), progress.clone());
    progress
  }

  async fn run(
    &self,
    pipeline: &Pipeline,
    cancel: CancellationToken,
    progress: &SharedSnapshot,
  ) -> Result<PipelineRun, PipelineError> {
    // Child token so a pipeline timeout stops in-flight tasks without
    // cancelling the caller's token.
    let cancel = cancel.child_token();

    update(progress, |snapshot| snapshot.status = PipelineStatus::Running);
    info!(
      pipeline_id = %pipeline.id(),
      name = %pipeline.name(),
      stages = pipeline.steps().len(),
      "pipeline_started"
    );
    self.notifier.notify(ExecutionEvent::PipelineStarted {
      pipeline_id: pipeline.id().to_string(),
      name: pipeline.name().to_string(),
      stages: pipeline.steps().len(),
    });

    let result = match self.config.timeout_ms {
      Some(timeout_ms) => {
        let limit = Duration::from_millis(timeout_ms);
        match tokio::time::timeout(limit, self.run_stages(pipeline, &cancel, progress)).await {
          Ok(result) => result,
          Err(_) => {
            cancel.cancel();
            Err(PipelineError::Timeout { timeout_ms })
          }
        }
      }
      None => self.run_stages(pipeline, &cancel, progress).await,
    };

    match &result {
      Ok(run) => {
        update(progress, |snapshot| {
          snapshot.status = PipelineStatus::Completed;
          snapshot.output = Some(run.output.clone());
        });
        info!(pipeline_id = %pipeline.id(), outputs = run.output.len(), "pipeline_completed");
        self.notifier.notify(ExecutionEvent::PipelineCompleted {
          pipeline_id: pipeline.id().to_string(),
        });
      }
      Err(e) => {
        update(progress, |snapshot| {
          snapshot.status = PipelineStatus::Failed;
          snapshot.error = Some(e.to_string());
          if let PipelineError::StageFailed { stage_index, .. } = e {
            snapshot.failed_stage = Some(*stage_index);
          }
        });
        error!(pipeline_id = %pipeline.id(), error = %e, "pipeline_failed");
        self.notifier.notify(ExecutionEvent::PipelineFailed {
          pipeline_id: pipeline.id().to_string(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  async fn run_stages(
    &self,
    pipeline: &Pipeline,
    cancel: &CancellationToken,
    progress: &SharedSnapshot,
  ) -> Result<PipelineRun, PipelineError> {
    let steps = pipeline.steps();
    let mut inputs = vec![pipeline.input().clone()];
    let mut stages = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
      let mut state = StepExecutionState::new(index, step.name(), inputs);
      update(progress, |snapshot| {
        snapshot.current_stage = Some(index);
        snapshot.stages.push(state.clone());
      });

      self.run_stage(pipeline, step, &mut state, cancel).await?;

      let verdict = settle(step, steps.get(index + 1), &state);
      match verdict {
        Ok(next) => {
          state.status = StageStatus::Completed;
          info!(
            pipeline_id = %pipeline.id(),
            stage_index = index,
            step = %step.name(),
            succeeded = state.succeeded(),
            failed = state.failed(),
            next_inputs = next.len(),
            "stage_completed"
          );
          self.notifier.notify(ExecutionEvent::StageCompleted {
            pipeline_id: pipeline.id().to_string(),
            stage_index: index,
            succeeded: state.succeeded(),
            failed: state.failed(),
          });
          record_stage(progress, &state);
          stages.push(state);
          inputs = next;
        }
        Err(source) => {
          state.status = StageStatus::Failed;
          state.error = Some(source.to_string());
          warn!(
            pipeline_id = %pipeline.id(),
            stage_index = index,
            step = %step.name(),
            error = %source,
            "stage_failed"
          );
          self.notifier.notify(ExecutionEvent::StageFailed {
            pipeline_id: pipeline.id().to_string(),
            stage_index: index,
            error: source.to_string(),
          });
          record_stage(progress, &state);
          return Err(PipelineError::StageFailed {
            stage_index: index,
            step: step.name().to_string(),
            source,
          });
        }
      }
    }

    Ok(PipelineRun {
      pipeline_id: pipeline.id().to_string(),
      output: inputs.into_iter().map(unwrap_default).collect(),
      stages,
    })
  }

  /// Build and dispatch one task per stage input, filling `state.tasks`.
  async fn run_stage(
    &self,
    pipeline: &Pipeline,
    step: &Step,
    state: &mut StepExecutionState,
    cancel: &CancellationToken,
  ) -> Result<(), PipelineError> {
    let timeout = step
      .timeout()
      .unwrap_or_else(|| self.dispatcher.config().task_timeout());

    let mut records: Vec<Option<TaskRecord>> = vec![None; state.inputs.len()];
    let mut tasks = Vec::with_capacity(state.inputs.len());
    let mut indices = Vec::with_capacity(state.inputs.len());

    for (index, input) in state.inputs.iter().enumerate() {
      match build_task(pipeline, step, input, timeout) {
        Ok(task) => {
          indices.push(index);
          tasks.push(task);
        }
        Err(reason) => {
          warn!(
            pipeline_id = %pipeline.id(),
            stage_index = state.stage_index,
            input_index = index,
            error = %reason,
            "task_not_built"
          );
          self.notifier.notify(ExecutionEvent::TaskFailed {
            pipeline_id: pipeline.id().to_string(),
            stage_index: state.stage_index,
            task_id: None,
            error: reason.clone(),
          });
          records[index] = Some(TaskRecord::not_built(index, reason));
        }
      }
    }

    info!(
      pipeline_id = %pipeline.id(),
      stage_index = state.stage_index,
      step = %step.name(),
      tasks = tasks.len(),
      "stage_started"
    );
    self.notifier.notify(ExecutionEvent::StageStarted {
      pipeline_id: pipeline.id().to_string(),
      stage_index: state.stage_index,
      step: step.name().to_string(),
      tasks: tasks.len(),
    });

    let results = tokio::select! {
      results = self.dispatcher.dispatch_many(tasks, cancel.clone()) => results,
      _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
    };
    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    for (index, result) in indices.into_iter().zip(results) {
      let record = TaskRecord::from_result(index, result);
      self.notify_task(pipeline.id(), state.stage_index, &record);
      records[index] = Some(record);
    }

    state.tasks = records.into_iter().flatten().collect();
    Ok(())
  }

  fn notify_task(&self, pipeline_id: &str, stage_index: usize, record: &TaskRecord) {
    let task_id = record.task_id.clone();
    let event = match &record.status {
      TaskStatus::Completed { output } => ExecutionEvent::TaskCompleted {
        pipeline_id: pipeline_id.to_string(),
        stage_index,
        task_id: task_id.unwrap_or_default(),
        executor_id: output.executor_id.clone(),
        roundtrip_ms: record.roundtrip_ms.unwrap_or_default(),
      },
      TaskStatus::Failed { reason } => ExecutionEvent::TaskFailed {
        pipeline_id: pipeline_id.to_string(),
        stage_index,
        task_id,
        error: reason.clone(),
      },
      TaskStatus::TimedOut => ExecutionEvent::TaskFailed {
        pipeline_id: pipeline_id.to_string(),
        stage_index,
        task_id,
        error: "timed out".to_string(),
      },
    };
    self.notifier.notify(event);
  }
}

fn build_task(
  pipeline: &Pipeline,
  step: &Step,
  input: &TaskInput,
  timeout: Duration,
) -> Result<Task, String> {
  let payload = step
    .template()
    .create_payload(step.name(), input)
    .map_err(|e| e.to_string())?;
  let task = Task::new(payload, step.accepted_executors().to_vec(), timeout)
    .map_err(|e| e.to_string())?
    .with_origin(pipeline.id(), step.name());

  Ok(match step.max_retries() {
    Some(max_retries) => task.with_max_retries(max_retries),
    None => task,
  })
}

/// Decide whether a finished stage can hand anything forward, and compose
/// what it hands forward.
///
/// The last stage composes its parsed results under [`DEFAULT_KEY`] so the
/// pipeline output keeps the operator's shape.
fn settle(
  step: &Step,
  next: Option<&Step>,
  state: &StepExecutionState,
) -> Result<Vec<TaskInput>, StageError> {
  let total = state.tasks.len();
  let succeeded = state.succeeded();
  if succeeded == 0 {
    return Err(StageError::NoUsableOutput { total });
  }

  let required = step.required_successes(total);
  if succeeded < required {
    return Err(StageError::BelowMinCompute {
      succeeded,
      total,
      required,
    });
  }

  let composed = match next {
    Some(next) => step
      .operator()
      .compose(state, state.output_values(), &next.input_keys()),
    None => {
      let values = state
        .outputs()
        .map(|output| step.template().parse_result(output))
        .collect();
      step
        .operator()
        .compose(state, values, &[DEFAULT_KEY.to_string()])
    }
  };
  composed.map_err(|source| StageError::Composition { source })
}

fn record_stage(progress: &SharedSnapshot, state: &StepExecutionState) {
  update(progress, |snapshot| {
    if let Some(slot) = snapshot.stages.get_mut(state.stage_index) {
      *slot = state.clone();
    }
  });
}

fn unwrap_default(input: TaskInput) -> Value {
  match input.get(DEFAULT_KEY) {
    Some(value) if input.len() == 1 => value.clone(),
    _ => input.into_value(),
  }
}
