//! Taskmesh Pipeline
//!
//! Sequences [`Step`]s into a [`Pipeline`] and runs it over the worker
//! network. Stages execute strictly in order: every task of a stage settles
//! before its [`CompositionOperator`] builds the next stage's inputs.
//!
//! ```text
//! root input ─► stage 0 ─(scatter)─► stage 1 ×N ─(aggregate)─► stage 2 ─► output
//! ```
//!
//! Partial failure inside a stage is tolerated unless the step declares a
//! `min_compute` fraction. A stage with no usable output fails the pipeline.

mod error;
mod events;
mod executor;
mod operator;
mod parse;
mod pipeline;
mod step;
mod template;

pub use error::{CompositionError, PipelineError, StageError, TemplateError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{PipelineExecutor, PipelineHandle, PipelineRun, PipelineSnapshot};
pub use operator::{CompositionOperator, DEFAULT_KEY};
pub use parse::{parse_json, structured};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStatus};
pub use step::{StageStatus, Step, StepBuilder, StepExecutionState, TaskRecord, TaskStatus};
pub use template::{FnTemplate, PromptTemplate, StepTemplate, require_keys};
