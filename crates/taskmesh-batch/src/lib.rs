//! Taskmesh Batch
//!
//! Runs one step template over many independent inputs. Unlike a pipeline
//! there are no stages: each input becomes one task, at most
//! `BatchConfig::concurrency` tasks are in flight, and a failing item never
//! holds up its siblings.

mod error;
mod executor;

pub use error::{BatchError, BatchItemError};
pub use executor::{BatchExecutor, BatchItem};
