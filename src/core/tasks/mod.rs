// src/core/tasks/mod.rs

//! Shared concurrency primitives used by the queue processors: backoff/retry
//! policies, rate limiting, the weighted-round-robin priority scheduler, and
//! per-workflow sequential task queues.

pub mod backoff;
pub mod rate_limit;
pub mod scheduler;
pub mod sequential;

pub use backoff::{RetryPolicy, jit_duration};
pub use rate_limit::RateLimiter;
pub use scheduler::{Priority, PriorityTaskScheduler, TaskFn};
pub use sequential::SequentialTaskQueues;
