//! Taskmesh Network
//!
//! The boundary between the engine and the remote worker pool. The engine
//! only needs two operations, expressed by the [`Network`] trait:
//! - `publish(task)` schedules a task and returns an acknowledgement
//! - `fetch(task_id)` reports whether a result is pending, ready or failed
//!
//! Two implementations are provided:
//! - [`HttpNetwork`] talks to the RPC endpoint of a worker node over HTTP
//! - [`MemoryNetwork`] simulates a worker pool in-process

mod error;
mod http;
mod memory;
mod network;

pub use error::NetworkError;
pub use http::HttpNetwork;
pub use memory::{MemoryNetwork, PublishRecord, WorkerReply};
pub use network::{FetchStatus, Network, PublishAck};
