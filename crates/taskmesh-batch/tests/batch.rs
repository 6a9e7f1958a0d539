use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use taskmesh_batch::{BatchError, BatchExecutor, BatchItemError};
use taskmesh_config::{BatchConfig, DispatchConfig, ExecutorCatalogDef, RetryBackoff, StepDef};
use taskmesh_dispatch::TaskDispatcher;
use taskmesh_network::{MemoryNetwork, WorkerReply};
use taskmesh_pipeline::{FnTemplate, Step};
use taskmesh_task::{ExecutorCatalog, Task, TaskInput};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn dispatch_config() -> DispatchConfig {
  DispatchConfig {
    poll_interval_ms: 100,
    task_timeout_ms: 60_000,
    silence_window_ms: 30_000,
    blacklist_duration_ms: 60_000,
    max_retries: 1,
    retry_backoff_ms: 100,
    retry_backoff: RetryBackoff::Constant,
  }
}

/// Answers each task with its `n` after `delay_ms`; rejects odd `n` when
/// `reject_odd` is set.
fn pool(reject_odd: bool) -> MemoryNetwork {
  MemoryNetwork::new(move |task: &Task| {
    let payload = task.payload();
    let n = payload["n"].as_u64().unwrap_or_default();
    let delay = Duration::from_millis(payload["delay_ms"].as_u64().unwrap_or_default());
    if reject_odd && n % 2 == 1 {
      WorkerReply::reject("node-a", "Invalid prompt")
    } else {
      WorkerReply::respond("node-a", delay, json!(n))
    }
  })
}

fn batch(network: &MemoryNetwork, concurrency: usize) -> BatchExecutor {
  let dispatcher = TaskDispatcher::new(Arc::new(network.clone()), dispatch_config());
  let step = Step::builder("count", FnTemplate::new(&["n", "delay_ms"], |input| input.clone().into_value()))
    .executors(["gpt-4o"])
    .build()
    .unwrap();
  BatchExecutor::new(dispatcher, step, BatchConfig { concurrency }).unwrap()
}

fn input(n: u64, delay_ms: u64) -> TaskInput {
  TaskInput::new().with("n", n).with("delay_ms", delay_ms)
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_input_order() {
  let network = pool(false);
  let mut executor = batch(&network, 10);
  // Later inputs finish first.
  executor.load_inputs((0..5).map(|n| input(n, 1_000 - n * 200)));

  let items = executor.run(CancellationToken::new()).await;

  assert_eq!(items.len(), 5);
  for (index, item) in items.iter().enumerate() {
    assert_eq!(item.index, index);
    assert_eq!(item.result.as_ref().unwrap(), &json!(index));
  }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounds_tasks_in_flight() {
  let network = pool(false);
  let mut executor = batch(&network, 2);
  executor.load_inputs((0..6).map(|n| input(n, 1_000)));

  let started = Instant::now();
  let items = executor.run(CancellationToken::new()).await;
  let elapsed = started.elapsed();

  assert!(items.iter().all(|item| item.is_ok()));
  // Three waves of two one-second tasks.
  assert!(elapsed >= Duration::from_secs(3));
  assert!(elapsed < Duration::from_secs(4));

  let log = network.publish_log();
  let first_wave = log.iter().filter(|record| record.published_at == started).count();
  assert_eq!(first_wave, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_items_stay_in_place() {
  let network = pool(true);
  let mut executor = batch(&network, 4);
  executor.load_inputs((0..4).map(|n| input(n, 100)));

  let items = executor.run(CancellationToken::new()).await;

  assert_eq!(items[0].result.as_ref().unwrap(), &json!(0));
  assert!(matches!(items[1].result, Err(BatchItemError::Dispatch(_))));
  assert_eq!(items[2].result.as_ref().unwrap(), &json!(2));
  assert!(matches!(items[3].result, Err(BatchItemError::Dispatch(_))));
  // Rejections are not retried.
  assert_eq!(items[1].attempt_ids.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_is_reported_without_dispatch() {
  let network = pool(false);
  let mut executor = batch(&network, 4);
  executor.load_inputs([input(0, 0), TaskInput::new().with("n", 1), input(2, 0)]);

  let items = executor.run(CancellationToken::new()).await;

  assert!(items[0].is_ok());
  assert!(matches!(items[1].result, Err(BatchItemError::InvalidInput { .. })));
  assert!(items[1].task_id.is_none());
  assert!(items[2].is_ok());
  assert_eq!(network.publish_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_batch_reports_every_item() {
  let network = pool(false);
  let mut executor = batch(&network, 1);
  executor.load_inputs((0..3).map(|n| input(n, 10_000)));

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(500)).await;
    trigger.cancel();
  });

  let items = executor.run(cancel).await;

  assert_eq!(items.len(), 3);
  assert!(items.iter().all(|item| !item.is_ok()));
  assert!(matches!(items[2].result, Err(BatchItemError::NotDispatched)));
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch() {
  let items = batch(&pool(false), 4).run(CancellationToken::new()).await;
  assert!(items.is_empty());
}

#[test]
fn test_zero_concurrency_rejected() {
  let network = pool(false);
  let dispatcher = TaskDispatcher::new(Arc::new(network), dispatch_config());
  let step = Step::builder("count", FnTemplate::new(&["n"], |input| input.clone().into_value()))
    .executors(["gpt-4o"])
    .build()
    .unwrap();

  let result = BatchExecutor::new(dispatcher, step, BatchConfig { concurrency: 0 });
  assert!(matches!(result, Err(BatchError::InvalidConfig { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_from_def_renders_prompts() {
  let network = MemoryNetwork::new(|task: &Task| {
    WorkerReply::respond("node-a", Duration::ZERO, task.payload()["prompt"].clone())
  });
  let dispatcher = TaskDispatcher::new(Arc::new(network), dispatch_config());
  let def: StepDef = serde_json::from_value(json!({
    "name": "greet",
    "template": "Hello {{ name }}!",
    "config": { "accepted_executors": ["gpt-4o"] }
  }))
  .unwrap();

  let mut executor = BatchExecutor::from_def(
    dispatcher,
    &def,
    &ExecutorCatalog::new(&ExecutorCatalogDef::default()),
    BatchConfig::default(),
  )
  .unwrap();
  executor.load_inputs(["ada", "grace"].map(|name| TaskInput::new().with("name", name)));

  let values: Vec<_> = executor
    .run(CancellationToken::new())
    .await
    .into_iter()
    .map(|item| item.result.unwrap())
    .collect();
  assert_eq!(values, vec![json!("Hello ada!"), json!("Hello grace!")]);
}

fn paused_runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .start_paused(true)
    .build()
    .unwrap()
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(32))]

  // Whatever the completion order and admission limit, item i answers
  // input i and the batch has exactly one item per input.
  #[test]
  fn test_order_preserved(
    delays in proptest::collection::vec(0u64..2_000, 0..24),
    concurrency in 1usize..8,
  ) {
    let rt = paused_runtime();
    rt.block_on(async {
      let network = pool(false);
      let mut executor = batch(&network, concurrency);
      executor.load_inputs(
        delays.iter().enumerate().map(|(n, delay)| input(n as u64, *delay)),
      );

      let items = executor.run(CancellationToken::new()).await;

      prop_assert_eq!(items.len(), delays.len());
      for (index, item) in items.iter().enumerate() {
        prop_assert_eq!(item.index, index);
        prop_assert_eq!(item.result.as_ref().ok(), Some(&json!(index)));
      }
      Ok(())
    })?;
  }
}
