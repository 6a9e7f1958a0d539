//! Taskmesh Dispatch
//!
//! Drives single tasks through the worker network: publish, poll on a fixed
//! interval, give up at the task's deadline, and republish under a new
//! identity while retries remain.
//!
//! The [`HealthTracker`] is the only state shared between concurrently
//! dispatched tasks. It remembers executors that went silent so the
//! dispatcher can avoid waiting on them again.

mod dispatcher;
mod error;
mod health;
mod result;

pub use dispatcher::TaskDispatcher;
pub use error::DispatchError;
pub use health::HealthTracker;
pub use result::{FailureCause, TaskOutcome, TaskResult};
