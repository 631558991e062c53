// src/core/queues/mod.rs

//! The transfer, timer, and replication queue processors, and the
//! multi-cursor processing queues they read through.

pub mod processing_queue;
pub mod processor;
pub mod replication;
pub mod timer;
pub mod transfer;

pub use processing_queue::{ProcessingQueue, SplitPolicyConfig};
pub use processor::{QueueProcessor, QueueTaskSource};
pub use replication::ReplicationQueueProcessor;
pub use timer::{NoopTimerTaskHandler, TimerQueueProcessor, TimerTaskHandler, TimerTaskSource};
pub use transfer::{
    NoopTransferTaskHandler, TransferQueueProcessor, TransferTaskHandler, TransferTaskSource,
};
