// src/core/tasks/sequential.rs

//! Per-workflow sequential task queues. Tasks submitted for the same
//! `(DomainID, WorkflowID, RunID)` run in submission order; tasks for
//! different keys proceed concurrently through the priority scheduler.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::tasks::scheduler::{Priority, PriorityTaskScheduler, TaskFn};
use crate::core::types::WorkflowKey;

#[derive(Default)]
struct KeyQueue {
    tasks: VecDeque<(Priority, TaskFn)>,
    /// True while a drain task for this key is queued or running. At most one
    /// drain exists per key, which is what serializes execution.
    scheduled: bool,
}

/// Fans tasks out to the priority scheduler while keeping per-key ordering.
pub struct SequentialTaskQueues {
    scheduler: Arc<PriorityTaskScheduler>,
    queues: DashMap<WorkflowKey, KeyQueue>,
}

impl SequentialTaskQueues {
    pub fn new(scheduler: Arc<PriorityTaskScheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            queues: DashMap::new(),
        })
    }

    /// Number of keys with pending or running tasks.
    pub fn active_keys(&self) -> usize {
        self.queues.len()
    }

    /// Enqueues a task for the key. The task runs after every previously
    /// submitted task for the same key has completed.
    pub fn submit(self: &Arc<Self>, key: WorkflowKey, priority: Priority, task: TaskFn) {
        let schedule = {
            let mut entry = self.queues.entry(key.clone()).or_default();
            entry.tasks.push_back((priority, task));
            if entry.scheduled {
                false
            } else {
                entry.scheduled = true;
                true
            }
        };
        if schedule {
            self.schedule_drain(key, priority);
        }
    }

    fn schedule_drain(self: &Arc<Self>, key: WorkflowKey, priority: Priority) {
        let this = Arc::clone(self);
        self.scheduler.submit(
            priority,
            Box::new(move || Box::pin(async move { this.drain_one(key).await })),
        );
    }

    async fn drain_one(self: Arc<Self>, key: WorkflowKey) {
        let task = self
            .queues
            .get_mut(&key)
            .and_then(|mut entry| entry.tasks.pop_front());
        if let Some((_, task)) = task {
            task().await;
        }

        // Either hand the key back to the scheduler or retire it.
        let next = {
            match self.queues.get_mut(&key) {
                Some(mut entry) => {
                    if let Some((priority, _)) = entry.tasks.front() {
                        Some(*priority)
                    } else {
                        entry.scheduled = false;
                        None
                    }
                }
                None => None,
            }
        };
        match next {
            Some(priority) => self.schedule_drain(key, priority),
            None => {
                self.queues.remove_if(&key, |_, entry| {
                    entry.tasks.is_empty() && !entry.scheduled
                });
            }
        }
    }
}

impl std::fmt::Debug for SequentialTaskQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialTaskQueues")
            .field("active_keys", &self.queues.len())
            .finish()
    }
}
