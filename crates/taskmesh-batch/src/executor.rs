//! Batch executor.
//!
//! Runs one [`Step`] over many independent inputs with a bounded number of
//! tasks in flight. Results are written back by input index, so completion
//! order never leaks into the output.

use taskmesh_config::{BatchConfig, StepDef};
use taskmesh_dispatch::TaskDispatcher;
use taskmesh_pipeline::Step;
use taskmesh_task::{ExecutorCatalog, Task, TaskInput};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{BatchError, BatchItemError};

/// Outcome for one input of a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
  /// Position of the input in the loaded batch.
  pub index: usize,
  pub task_id: Option<String>,
  pub attempt_ids: Vec<String>,
  pub result: Result<serde_json::Value, BatchItemError>,
}

impl BatchItem {
  fn failed(index: usize, error: BatchItemError) -> Self {
    Self {
      index,
      task_id: None,
      attempt_ids: Vec::new(),
      result: Err(error),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.result.is_ok()
  }
}

/// Runs a single step over a list of inputs.
pub struct BatchExecutor {
  dispatcher: TaskDispatcher,
  step: Step,
  config: BatchConfig,
  inputs: Vec<TaskInput>,
}

impl BatchExecutor {
  pub fn new(dispatcher: TaskDispatcher, step: Step, config: BatchConfig) -> Result<Self, BatchError> {
    if config.concurrency == 0 {
      return Err(BatchError::InvalidConfig {
        message: "concurrency must be at least 1".to_string(),
      });
    }

    Ok(Self {
      dispatcher,
      step,
      config,
      inputs: Vec::new(),
    })
  }

  /// Build the executor for a prompt step definition.
  pub fn from_def(
    dispatcher: TaskDispatcher,
    def: &StepDef,
    catalog: &ExecutorCatalog,
    config: BatchConfig,
  ) -> Result<Self, BatchError> {
    let step = Step::from_def(def, catalog).map_err(|source| BatchError::Step { source })?;
    Self::new(dispatcher, step, config)
  }

  /// Append inputs to the batch.
  pub fn load_inputs(&mut self, inputs: impl IntoIterator<Item = TaskInput>) {
    self.inputs.extend(inputs);
  }

  pub fn inputs(&self) -> &[TaskInput] {
    &self.inputs
  }

  pub fn step(&self) -> &Step {
    &self.step
  }

  /// Dispatch every loaded input. The result has one item per input, in
  /// input order.
  #[instrument(
    name = "batch_run",
    skip(self, cancel),
    fields(
      step = %self.step.name(),
      items = self.inputs.len(),
      concurrency = self.config.concurrency,
    )
  )]
  pub async fn run(&self, cancel: CancellationToken) -> Vec<BatchItem> {
    info!(step = %self.step.name(), items = self.inputs.len(), "batch_started");

    let mut items: Vec<Option<BatchItem>> = (0..self.inputs.len()).map(|_| None).collect();
    let mut pending = self.inputs.iter().enumerate();
    let mut running = JoinSet::new();

    loop {
      while running.len() < self.config.concurrency && !cancel.is_cancelled() {
        let Some((index, input)) = pending.next() else {
          break;
        };

        match self.build_task(input) {
          Ok(task) => {
            let dispatcher = self.dispatcher.clone();
            let cancel = cancel.clone();
            running.spawn(async move { (index, dispatcher.dispatch(task, cancel).await) });
          }
          Err(message) => {
            warn!(index, error = %message, "batch_item_invalid");
            items[index] = Some(BatchItem::failed(
              index,
              BatchItemError::InvalidInput { message },
            ));
          }
        }
      }

      let Some(joined) = running.join_next().await else {
        break;
      };
      match joined {
        Ok((index, result)) => {
          let task_id = result.task_id.clone();
          let attempt_ids = result.attempt_ids.clone();
          let value = result
            .into_output()
            .map(|output| self.step.template().parse_result(&output))
            .map_err(BatchItemError::from);
          items[index] = Some(BatchItem {
            index,
            task_id: Some(task_id),
            attempt_ids,
            result: value,
          });
        }
        // The slot stays empty and is reported as aborted below.
        Err(e) => error!(error = %e, "batch_item_aborted"),
      }
    }

    let items: Vec<BatchItem> = items
      .into_iter()
      .enumerate()
      .map(|(index, item)| {
        item.unwrap_or_else(|| {
          let error = if cancel.is_cancelled() {
            BatchItemError::NotDispatched
          } else {
            BatchItemError::Aborted
          };
          BatchItem::failed(index, error)
        })
      })
      .collect();

    let succeeded = items.iter().filter(|item| item.is_ok()).count();
    info!(
      step = %self.step.name(),
      succeeded,
      failed = items.len() - succeeded,
      "batch_completed"
    );
    items
  }

  fn build_task(&self, input: &TaskInput) -> Result<Task, String> {
    let payload = self
      .step
      .template()
      .create_payload(self.step.name(), input)
      .map_err(|e| e.to_string())?;
    let timeout = self
      .step
      .timeout()
      .unwrap_or_else(|| self.dispatcher.config().task_timeout());
    let task = Task::new(payload, self.step.accepted_executors().to_vec(), timeout)
      .map_err(|e| e.to_string())?;

    Ok(match self.step.max_retries() {
      Some(max_retries) => task.with_max_retries(max_retries),
      None => task,
    })
  }
}
