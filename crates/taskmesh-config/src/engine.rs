use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::ExecutorCatalogDef;
use crate::dispatch::DispatchConfig;
use crate::error::ConfigError;
use crate::network::NetworkConfig;

/// Settings for the batch executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  /// Maximum number of items in flight at once.
  pub concurrency: usize,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self { concurrency: 50 }
  }
}

/// Settings shared by all pipelines run by one executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Upper bound for a whole pipeline. Unbounded when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl PipelineConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub network: NetworkConfig,
  pub dispatch: DispatchConfig,
  pub batch: BatchConfig,
  pub pipeline: PipelineConfig,
  pub executors: ExecutorCatalogDef,
}

impl EngineConfig {
  /// Read and validate a configuration file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: EngineConfig =
      serde_json::from_str(content).map_err(|source| ConfigError::Parse { source })?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.network.validate()?;
    self.dispatch.validate()?;
    if self.batch.concurrency == 0 {
      return Err(ConfigError::invalid(
        "batch.concurrency",
        "must be greater than zero",
      ));
    }
    if self.pipeline.timeout_ms == Some(0) {
      return Err(ConfigError::invalid(
        "pipeline.timeout_ms",
        "must be greater than zero",
      ));
    }
    Ok(())
  }
}
