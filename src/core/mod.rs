// src/core/mod.rs

//! The central module containing the core logic and data structures of Warpflow.

pub mod domain;
pub mod dynamicconfig;
pub mod errors;
pub mod execution;
pub mod membership;
pub mod metrics;
pub mod persistence;
pub mod queues;
pub mod shard;
pub mod tasks;
pub mod types;

pub use errors::WarpflowError;
pub use types::{CloseStatus, WorkflowKey, WorkflowState};
