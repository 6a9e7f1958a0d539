use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskmesh_batch::BatchExecutor;
use taskmesh_config::{EngineConfig, PipelineDef, StepDef};
use taskmesh_dispatch::TaskDispatcher;
use taskmesh_network::HttpNetwork;
use taskmesh_pipeline::{PipelineBuilder, PipelineExecutor};
use taskmesh_task::{ExecutorCatalog, TaskInput};

/// Taskmesh - dispatch pipelines of tasks to a pool of remote workers
#[derive(Parser)]
#[command(name = "taskmesh")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.taskmesh)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the engine config (default: <data-dir>/config.json when present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline or a batch
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Check that the worker node's RPC endpoint is healthy
  Health,
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run a pipeline definition. Root input is read from stdin when piped.
  Pipeline {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,
  },

  /// Run one step over a JSON array of inputs read from stdin
  Batch {
    /// Path to the step file (JSON)
    step_file: PathBuf,

    /// Maximum number of tasks in flight
    #[arg(long)]
    concurrency: Option<usize>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".taskmesh")
  });
  let config = load_config(cli.config.as_deref(), &data_dir)?;

  match cli.command {
    Some(Commands::Run { target }) => match target {
      RunTarget::Pipeline { pipeline_file } => {
        run_pipeline(pipeline_file, config)?;
      }
      RunTarget::Batch {
        step_file,
        concurrency,
      } => {
        run_batch(step_file, concurrency, config)?;
      }
    },
    Some(Commands::Health) => {
      check_health(config)?;
    }
    None => {
      println!("taskmesh - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  let filter = EnvFilter::try_from_env("TASKMESH_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(io::stderr)
    .init();
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<EngineConfig> {
  if let Some(path) = explicit {
    return EngineConfig::load(path)
      .with_context(|| format!("failed to load config: {}", path.display()));
  }

  let default_path = data_dir.join("config.json");
  if default_path.exists() {
    EngineConfig::load(&default_path)
      .with_context(|| format!("failed to load config: {}", default_path.display()))
  } else {
    Ok(EngineConfig::default())
  }
}

/// Connect to the node. The returned client must be closed once the
/// dispatcher is done with it.
async fn connect(config: &EngineConfig) -> Result<(TaskDispatcher, Arc<HttpNetwork>)> {
  let network = HttpNetwork::connect(&config.network)
    .await
    .with_context(|| format!("failed to connect to {}", config.network.base_url))?;
  let network = Arc::new(network);
  let dispatcher = TaskDispatcher::new(network.clone(), config.dispatch.clone());
  Ok((dispatcher, network))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      token.cancel();
    }
  });
}

fn run_pipeline(pipeline_file: PathBuf, config: EngineConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_pipeline_async(pipeline_file, config).await })
}

async fn run_pipeline_async(pipeline_file: PathBuf, config: EngineConfig) -> Result<()> {
  let content = tokio::fs::read_to_string(&pipeline_file)
    .await
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;
  let def: PipelineDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))?;

  let catalog = ExecutorCatalog::new(&config.executors);
  let mut builder = PipelineBuilder::from_def(&def, &catalog).context("invalid pipeline definition")?;
  if let Some(payload) = read_payload_from_stdin()? {
    let input = TaskInput::from_value(payload).context("pipeline input must be a JSON object")?;
    builder = builder.input(input);
  }
  let pipeline = builder.build().context("invalid pipeline")?;

  info!(name = %pipeline.name(), stages = pipeline.steps().len(), "loaded pipeline");

  let (dispatcher, network) = connect(&config).await?;
  let executor = PipelineExecutor::new(dispatcher, config.pipeline.clone());

  let cancel = CancellationToken::new();
  cancel_on_interrupt(cancel.clone());

  let result = executor.execute(&pipeline, cancel).await;
  network.close();
  let run = result.context("pipeline execution failed")?;

  println!("{}", serde_json::to_string_pretty(&run.output)?);

  Ok(())
}

fn run_batch(step_file: PathBuf, concurrency: Option<usize>, config: EngineConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_batch_async(step_file, concurrency, config).await })
}

async fn run_batch_async(
  step_file: PathBuf,
  concurrency: Option<usize>,
  config: EngineConfig,
) -> Result<()> {
  let content = tokio::fs::read_to_string(&step_file)
    .await
    .with_context(|| format!("failed to read step file: {}", step_file.display()))?;
  let def: StepDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse step file: {}", step_file.display()))?;

  let inputs = match read_payload_from_stdin()? {
    Some(serde_json::Value::Array(items)) => items
      .into_iter()
      .enumerate()
      .map(|(index, item)| {
        TaskInput::from_value(item).with_context(|| format!("batch input {} is not an object", index))
      })
      .collect::<Result<Vec<_>>>()?,
    Some(_) => bail!("batch input must be a JSON array"),
    None => bail!("no batch input on stdin"),
  };

  let mut batch_config = config.batch.clone();
  if let Some(concurrency) = concurrency {
    batch_config.concurrency = concurrency;
  }

  let (dispatcher, network) = connect(&config).await?;
  let catalog = ExecutorCatalog::new(&config.executors);
  let mut executor = match BatchExecutor::from_def(dispatcher, &def, &catalog, batch_config) {
    Ok(executor) => executor,
    Err(e) => {
      network.close();
      return Err(e).context("invalid batch");
    }
  };
  executor.load_inputs(inputs);

  let cancel = CancellationToken::new();
  cancel_on_interrupt(cancel.clone());

  let items = executor.run(cancel).await;
  network.close();
  let output: Vec<serde_json::Value> = items
    .into_iter()
    .map(|item| match item.result {
      Ok(value) => serde_json::json!({
        "index": item.index,
        "task_id": item.task_id,
        "result": value,
      }),
      Err(e) => serde_json::json!({
        "index": item.index,
        "task_id": item.task_id,
        "error": e.to_string(),
      }),
    })
    .collect();

  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn check_health(config: EngineConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let network = HttpNetwork::new(&config.network).context("failed to create RPC client")?;
    let healthy = network.health_check().await;
    network.close();
    let healthy = healthy.with_context(|| format!("failed to reach {}", config.network.base_url))?;
    if !healthy {
      bail!("node at {} is not healthy", config.network.base_url);
    }
    println!("node at {} is healthy", config.network.base_url);
    Ok(())
  })
}

fn read_payload_from_stdin() -> Result<Option<serde_json::Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(None);
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read input from stdin")?;

  if input.trim().is_empty() {
    Ok(None)
  } else {
    serde_json::from_str(&input)
      .map(Some)
      .context("failed to parse input JSON from stdin")
  }
}
