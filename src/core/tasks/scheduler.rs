// src/core/tasks/scheduler.rs

//! A priority task scheduler with weighted round-robin dispatch over N
//! priority classes and a shared worker pool.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// A unit of work accepted by the scheduler: a one-shot closure producing a
/// boxed future.
pub type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Priority classes, highest first. The class index selects the
/// round-robin weight configured for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Default,
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Default => 1,
            Priority::Low => 2,
        }
    }
}

/// The submit handle of the scheduler. Cheap to clone behind an `Arc`;
/// the paired [`SchedulerDriver`] must be spawned for tasks to execute.
#[derive(Debug)]
pub struct PriorityTaskScheduler {
    class_txs: Vec<mpsc::UnboundedSender<TaskFn>>,
    wakeup: Arc<Notify>,
}

/// Consumes the per-class channels and feeds the worker pool. Created
/// alongside the scheduler and driven by the server's task spawner.
pub struct SchedulerDriver {
    class_rxs: Vec<mpsc::UnboundedReceiver<TaskFn>>,
    weights: Vec<usize>,
    worker_count: usize,
    wakeup: Arc<Notify>,
}

impl PriorityTaskScheduler {
    /// Creates a scheduler with one class per weight entry. Priorities beyond
    /// the configured class count collapse into the lowest class.
    pub fn new(weights: Vec<usize>, worker_count: usize) -> (Arc<Self>, SchedulerDriver) {
        let class_count = weights.len().max(1);
        let mut class_txs = Vec::with_capacity(class_count);
        let mut class_rxs = Vec::with_capacity(class_count);
        for _ in 0..class_count {
            let (tx, rx) = mpsc::unbounded_channel();
            class_txs.push(tx);
            class_rxs.push(rx);
        }
        let wakeup = Arc::new(Notify::new());
        let scheduler = Arc::new(Self {
            class_txs,
            wakeup: Arc::clone(&wakeup),
        });
        let driver = SchedulerDriver {
            class_rxs,
            weights: if weights.is_empty() { vec![1] } else { weights },
            worker_count: worker_count.max(1),
            wakeup,
        };
        (scheduler, driver)
    }

    /// Enqueues a task into its priority class. Returns `false` if the
    /// scheduler has shut down.
    pub fn submit(&self, priority: Priority, task: TaskFn) -> bool {
        let class = priority.index().min(self.class_txs.len() - 1);
        if self.class_txs[class].send(task).is_err() {
            return false;
        }
        self.wakeup.notify_one();
        true
    }
}

impl SchedulerDriver {
    /// Runs the dispatcher and worker pool until shutdown. Each full sweep
    /// forwards up to `weight[i]` tasks from class `i`, so a busy high
    /// priority class cannot starve the lower ones entirely.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Priority task scheduler started with weights {:?}.", self.weights);
        let (work_tx, work_rx) = mpsc::channel::<TaskFn>(self.worker_count * 2);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.worker_count {
            let work_rx = Arc::clone(&work_rx);
            workers.spawn(async move {
                loop {
                    let task = {
                        let mut rx = work_rx.lock().await;
                        rx.recv().await
                    };
                    match task {
                        Some(task) => task().await,
                        None => return,
                    }
                }
            });
        }

        'dispatch: loop {
            let mut dispatched = false;
            for (class, rx) in self.class_rxs.iter_mut().enumerate() {
                for _ in 0..self.weights[class] {
                    match rx.try_recv() {
                        Ok(task) => {
                            if work_tx.send(task).await.is_err() {
                                break 'dispatch;
                            }
                            dispatched = true;
                        }
                        Err(_) => break,
                    }
                }
            }
            if dispatched {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
            } else {
                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }

        // Dropping the feed channel lets workers drain in-flight tasks and exit.
        drop(work_tx);
        while workers.join_next().await.is_some() {}
        info!("Priority task scheduler shut down.");
    }
}
