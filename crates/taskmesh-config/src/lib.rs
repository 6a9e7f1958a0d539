//! Taskmesh Config
//!
//! This crate contains the serializable configuration types for taskmesh.
//! These types describe how the engine talks to the worker network, how
//! tasks are dispatched and retried, and how pipelines are declared before
//! they are turned into runtime structures.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=config.json`)
//! - Any other source that can produce JSON (as blobs)
//!
//! Every field has a default so a partial file (or `{}`) is a valid config.

mod catalog;
mod dispatch;
mod engine;
mod enums;
mod error;
mod network;
mod pipeline;
mod step;

pub use catalog::ExecutorCatalogDef;
pub use dispatch::DispatchConfig;
pub use engine::{BatchConfig, EngineConfig, PipelineConfig};
pub use enums::{OperatorKind, RetryBackoff};
pub use error::ConfigError;
pub use network::{NetworkConfig, RPC_TOKEN_ENV};
pub use pipeline::{OperatorDef, PipelineDef, StepDef};
pub use step::StepConfig;
