//! Taskmesh Task
//!
//! The unit of work handed to the worker network. A [`Task`] carries an
//! opaque JSON payload, the executors it may run on, and an absolute
//! deadline. Pipelines build tasks from [`TaskInput`] records and read
//! [`ExecutorOutput`] values back.

mod catalog;
mod error;
mod input;
mod output;
mod task;

pub use catalog::ExecutorCatalog;
pub use error::TaskError;
pub use input::TaskInput;
pub use output::ExecutorOutput;
pub use task::Task;
