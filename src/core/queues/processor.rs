// src/core/queues/processor.rs

//! The generic per-shard queue processor. Transfer and timer processors are
//! instances of this over different task sources; both share the priority
//! scheduler and the per-workflow sequential queues.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::core::dynamicconfig::collection::{BoolPropertyFn, FloatPropertyFn, IntPropertyFn};
use crate::core::dynamicconfig::{Collection, DynamicConfigKey};
use crate::core::errors::WarpflowError;
use crate::core::metrics;
use crate::core::persistence::types::{ProcessingQueueState, TaskKey};
use crate::core::shard::ShardContext;
use crate::core::tasks::backoff::{RetryPolicy, jit_duration};
use crate::core::tasks::scheduler::Priority;
use crate::core::tasks::{RateLimiter, SequentialTaskQueues};
use crate::core::types::WorkflowKey;

use super::processing_queue::{ProcessingQueue, SplitPolicyConfig, consolidate_queues};

/// Base cadence between poll cycles.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Extra backoff multiplier applied when the store reports service-busy.
const SERVICE_BUSY_BACKOFF_MULTIPLIER: u32 = 4;

/// What a task source must provide for the generic processor to drive it.
#[async_trait]
pub trait QueueTaskSource: Send + Sync + 'static {
    type Task: Clone + Send + Sync + 'static;

    fn queue_name(&self) -> &'static str;
    fn task_key(task: &Self::Task) -> TaskKey;
    fn workflow_key(task: &Self::Task) -> WorkflowKey;
    fn domain_id(task: &Self::Task) -> &str;

    /// The ceiling tasks may be read up to.
    async fn max_read_level(&self) -> TaskKey;

    /// Tasks with `read_level < key <= max_read_level`, in key order.
    async fn read_batch(
        &self,
        read_level: TaskKey,
        max_read_level: TaskKey,
        batch_size: usize,
    ) -> Result<Vec<Self::Task>, WarpflowError>;

    async fn execute(&self, task: &Self::Task) -> Result<(), WarpflowError>;

    /// Deletes the task row after execution (or terminal drop).
    async fn complete(&self, task: &Self::Task) -> Result<(), WarpflowError>;

    /// Called when a task is dropped after exhausting retries or hitting a
    /// non-retryable error. Replication sources dead-letter here.
    async fn on_drop(&self, task: &Self::Task, error: &WarpflowError);

    /// Persists the new ack level into the shard record.
    async fn save_ack_level(&self, level: TaskKey);

    /// Loads persisted processing-queue states, when the deployment enables
    /// them.
    async fn load_queue_states(&self) -> Vec<ProcessingQueueState>;

    async fn persist_queue_states(&self, states: Vec<ProcessingQueueState>);

    /// The ack level to seed the root queue from on a cold start.
    async fn initial_ack_level(&self) -> TaskKey;
}

enum TaskOutcome {
    Completed(TaskKey),
    Retried(TaskKey),
    Dropped(TaskKey),
}

struct SplitKnobs {
    enable_pending: BoolPropertyFn,
    pending_threshold: IntPropertyFn,
    enable_stuck: BoolPropertyFn,
    stuck_threshold: IntPropertyFn,
    enable_random: BoolPropertyFn,
    random_probability: FloatPropertyFn,
    look_ahead: IntPropertyFn,
    max_level: IntPropertyFn,
    persist_states: BoolPropertyFn,
    max_retries: IntPropertyFn,
}

/// The generic processor: multi-cursor queues over one task source.
pub struct QueueProcessor<S: QueueTaskSource> {
    source: Arc<S>,
    shard: Arc<ShardContext>,
    sequential: Arc<SequentialTaskQueues>,
    host_limiter: Arc<RateLimiter>,
    shard_limiter: RateLimiter,
    queues: tokio::sync::Mutex<Vec<ProcessingQueue>>,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskOutcome>>,
    batch_size: usize,
    poll_backoff: Duration,
    retry_policy: RetryPolicy,
    knobs: SplitKnobs,
}

impl<S: QueueTaskSource> QueueProcessor<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<S>,
        shard: Arc<ShardContext>,
        sequential: Arc<SequentialTaskQueues>,
        host_limiter: Arc<RateLimiter>,
        shard_rps: f64,
        batch_size: usize,
        poll_backoff: Duration,
        dynamic_config: &Arc<Collection>,
    ) -> Arc<Self> {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            source,
            shard,
            sequential,
            host_limiter,
            shard_limiter: RateLimiter::new(shard_rps, batch_size.max(1)),
            queues: tokio::sync::Mutex::new(Vec::new()),
            outcome_tx,
            outcome_rx: tokio::sync::Mutex::new(outcome_rx),
            batch_size,
            poll_backoff,
            retry_policy: RetryPolicy::new(Duration::from_millis(100))
                .with_max_interval(Duration::from_secs(5)),
            knobs: SplitKnobs {
                enable_pending: dynamic_config.get_bool(DynamicConfigKey::EnablePendingTaskSplit),
                pending_threshold: dynamic_config
                    .get_int(DynamicConfigKey::PendingTaskSplitThreshold),
                enable_stuck: dynamic_config.get_bool(DynamicConfigKey::EnableStuckTaskSplit),
                stuck_threshold: dynamic_config
                    .get_int(DynamicConfigKey::StuckTaskSplitAttemptThreshold),
                enable_random: dynamic_config.get_bool(DynamicConfigKey::EnableRandomTaskSplit),
                random_probability: dynamic_config
                    .get_float(DynamicConfigKey::RandomTaskSplitProbability),
                look_ahead: dynamic_config.get_int(DynamicConfigKey::StuckTaskSplitLookAhead),
                max_level: dynamic_config.get_int(DynamicConfigKey::QueueSplitMaxLevel),
                persist_states: dynamic_config
                    .get_bool(DynamicConfigKey::EnablePersistQueueStates),
                max_retries: dynamic_config.get_int(DynamicConfigKey::TaskMaxRetryCount),
            },
        })
    }

    fn split_config(&self) -> SplitPolicyConfig {
        SplitPolicyConfig {
            enable_pending_task_split: (self.knobs.enable_pending)(),
            pending_task_split_threshold: (self.knobs.pending_threshold)().max(0) as usize,
            enable_stuck_task_split: (self.knobs.enable_stuck)(),
            stuck_task_attempt_threshold: (self.knobs.stuck_threshold)().max(0) as u32,
            enable_random_split: (self.knobs.enable_random)(),
            random_split_probability: (self.knobs.random_probability)(),
            stuck_task_look_ahead: (self.knobs.look_ahead)(),
            max_split_level: (self.knobs.max_level)().max(0) as usize,
        }
    }

    /// Seeds the processing queues: persisted states when present, otherwise
    /// a root queue from the stored ack level.
    async fn initialize_queues(&self) {
        let mut queues = self.queues.lock().await;
        if !queues.is_empty() {
            return;
        }
        let persisted = self.source.load_queue_states().await;
        if !persisted.is_empty() {
            *queues = persisted.into_iter().map(ProcessingQueue::new).collect();
            info!(
                "{} processor for shard {} restored {} processing queue(s).",
                self.source.queue_name(),
                self.shard.shard_id(),
                queues.len()
            );
            return;
        }
        let ack_level = self.source.initial_ack_level().await;
        let max_level = self.source.max_read_level().await;
        queues.push(ProcessingQueue::root(ack_level, max_level));
    }

    /// One poll cycle. Returns how long the caller should sleep before the
    /// next cycle.
    pub async fn poll_once(self: &Arc<Self>) -> Duration {
        if self.shard.is_quarantined() {
            return self.poll_backoff;
        }
        self.initialize_queues().await;
        self.absorb_outcomes().await;

        if !self.host_limiter.allow() || !self.shard_limiter.allow() {
            return jit_duration(self.poll_backoff, 0.2);
        }

        let ceiling = self.source.max_read_level().await;
        let mut queues = self.queues.lock().await;
        for queue_index in 0..queues.len() {
            queues[queue_index].set_max_level(ceiling);
            let read_level = queues[queue_index].read_level();
            let max_level = queues[queue_index].max_level().min(ceiling);
            if read_level >= max_level {
                continue;
            }
            let batch = match self
                .source
                .read_batch(read_level, max_level, self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        "{} processor for shard {} failed to read tasks: {e}",
                        self.source.queue_name(),
                        self.shard.shard_id()
                    );
                    self.shard.handle_error(&e);
                    continue;
                }
            };
            for task in batch {
                let key = S::task_key(&task);
                if queues[queue_index].add_task(key, S::domain_id(&task)) {
                    self.submit_task(task);
                }
            }
        }

        // Ack: the store-visible level is the lowest ack across all cursors.
        let mut min_ack: Option<TaskKey> = None;
        for queue in queues.iter_mut() {
            let ack = queue.advance_ack();
            min_ack = Some(match min_ack {
                Some(current) => current.min(ack),
                None => ack,
            });
        }
        if let Some(ack) = min_ack {
            self.source.save_ack_level(ack).await;
        }

        let split_config = self.split_config();
        let mut new_queues = Vec::new();
        for queue in queues.iter_mut() {
            new_queues.extend(queue.evaluate_splits(&split_config));
        }
        queues.extend(new_queues);
        consolidate_queues(&mut queues);

        if (self.knobs.persist_states)() {
            let states = queues.iter().map(|q| q.state().clone()).collect();
            self.source.persist_queue_states(states).await;
        }

        POLL_INTERVAL
    }

    async fn absorb_outcomes(&self) {
        let mut outcome_rx = self.outcome_rx.lock().await;
        let mut queues = self.queues.lock().await;
        while let Ok(outcome) = outcome_rx.try_recv() {
            match outcome {
                TaskOutcome::Completed(key) | TaskOutcome::Dropped(key) => {
                    for queue in queues.iter_mut() {
                        if queue.complete_task(key) {
                            break;
                        }
                    }
                }
                TaskOutcome::Retried(key) => {
                    for queue in queues.iter_mut() {
                        if queue.contains_task(key) {
                            queue.record_attempt(key);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fingerprints the task to its workflow's sequential queue and runs it
    /// with retry/backoff. Per-workflow tasks execute in submission order.
    fn submit_task(self: &Arc<Self>, task: S::Task) {
        let source = Arc::clone(&self.source);
        let shard = Arc::clone(&self.shard);
        let outcome_tx = self.outcome_tx.clone();
        let retry_policy = self.retry_policy.clone();
        let max_retries = (self.knobs.max_retries)().max(1) as u32;
        let workflow_key = S::workflow_key(&task);
        let queue_name = source.queue_name();

        self.sequential.submit(
            workflow_key,
            Priority::Default,
            Box::new(move || {
                Box::pin(async move {
                    let key = S::task_key(&task);
                    let started = Instant::now();
                    let mut attempt: u32 = 0;
                    loop {
                        match source.execute(&task).await {
                            Ok(()) => {
                                if let Err(e) = source.complete(&task).await {
                                    shard.handle_error(&e);
                                }
                                metrics::QUEUE_TASKS_COMPLETED_TOTAL
                                    .with_label_values(&[queue_name])
                                    .inc();
                                metrics::QUEUE_TASK_LATENCY_SECONDS
                                    .observe(started.elapsed().as_secs_f64());
                                let _ = outcome_tx.send(TaskOutcome::Completed(key));
                                return;
                            }
                            Err(e @ WarpflowError::ShardOwnershipLost { .. }) => {
                                // The controller relinquishes the shard; the
                                // task stays pending for the next owner.
                                shard.handle_error(&e);
                                return;
                            }
                            Err(e) if !e.is_retryable() => {
                                source.on_drop(&task, &e).await;
                                metrics::QUEUE_TASKS_DROPPED_TOTAL
                                    .with_label_values(&[queue_name])
                                    .inc();
                                if let Err(complete_err) = source.complete(&task).await {
                                    shard.handle_error(&complete_err);
                                }
                                let _ = outcome_tx.send(TaskOutcome::Dropped(key));
                                return;
                            }
                            Err(e) => {
                                attempt += 1;
                                let delay = retry_policy.next_delay(attempt - 1, started.elapsed());
                                if attempt >= max_retries || delay.is_none() {
                                    source.on_drop(&task, &e).await;
                                    metrics::QUEUE_TASKS_DROPPED_TOTAL
                                        .with_label_values(&[queue_name])
                                        .inc();
                                    if let Err(complete_err) = source.complete(&task).await {
                                        shard.handle_error(&complete_err);
                                    }
                                    let _ = outcome_tx.send(TaskOutcome::Dropped(key));
                                    return;
                                }
                                metrics::QUEUE_TASKS_RETRIED_TOTAL
                                    .with_label_values(&[queue_name])
                                    .inc();
                                let _ = outcome_tx.send(TaskOutcome::Retried(key));
                                let mut delay = delay.expect("checked above");
                                if matches!(e, WarpflowError::ServiceBusy(_)) {
                                    delay *= SERVICE_BUSY_BACKOFF_MULTIPLIER;
                                }
                                tokio::time::sleep(jit_duration(delay, 0.2)).await;
                            }
                        }
                    }
                })
            }),
        );
    }

    /// Runs the poll loop until shutdown or shard quarantine.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(
            "{} processor started for shard {}.",
            self.source.queue_name(),
            self.shard.shard_id()
        );
        loop {
            if self.shard.is_quarantined() {
                info!(
                    "{} processor for shard {} stopping: shard ownership lost.",
                    self.source.queue_name(),
                    self.shard.shard_id()
                );
                return;
            }
            let sleep = self.poll_once().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown_rx.recv() => {
                    info!(
                        "{} processor for shard {} shutting down.",
                        self.source.queue_name(),
                        self.shard.shard_id()
                    );
                    return;
                }
            }
        }
    }

    /// Snapshot of the current processing-queue windows.
    pub async fn queue_states(&self) -> Vec<ProcessingQueueState> {
        self.queues
            .lock()
            .await
            .iter()
            .map(|q| q.state().clone())
            .collect()
    }
}
