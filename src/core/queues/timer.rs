// src/core/queues/timer.rs

//! The timer queue: scheduled side-effects ordered by
//! `(VisibilityTimestamp, TaskID)`. The read horizon is clamped to
//! `now + MaxTimeShift`; delete-history tasks are archived inline up to a
//! size limit and handed to the archiver otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::dynamicconfig::collection::IntPropertyFn;
use crate::core::dynamicconfig::{Collection, DynamicConfigKey};
use crate::core::errors::WarpflowError;
use crate::core::persistence::store::ExecutionStore;
use crate::core::persistence::types::{ProcessingQueueState, TaskKey, TimerTask};
use crate::core::shard::ShardContext;
use crate::core::types::{TimerTaskType, WorkflowKey};

use super::processor::{QueueProcessor, QueueTaskSource};

/// One executor per timeout kind, mirroring the transfer handler shape.
#[async_trait]
pub trait TimerTaskHandler: Send + Sync + 'static {
    async fn handle_decision_timeout(&self, task: &TimerTask) -> Result<(), WarpflowError>;
    async fn handle_activity_timeout(&self, task: &TimerTask) -> Result<(), WarpflowError>;
    async fn handle_user_timer(&self, task: &TimerTask) -> Result<(), WarpflowError>;
    async fn handle_workflow_timeout(&self, task: &TimerTask) -> Result<(), WarpflowError>;
}

/// A handler that acknowledges every timeout without side effects.
pub struct NoopTimerTaskHandler;

#[async_trait]
impl TimerTaskHandler for NoopTimerTaskHandler {
    async fn handle_decision_timeout(&self, _task: &TimerTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_activity_timeout(&self, _task: &TimerTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_user_timer(&self, _task: &TimerTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_workflow_timeout(&self, _task: &TimerTask) -> Result<(), WarpflowError> {
        Ok(())
    }
}

/// The timer task source feeding the generic queue processor.
pub struct TimerTaskSource {
    shard: Arc<ShardContext>,
    store: Arc<dyn ExecutionStore>,
    handler: Arc<dyn TimerTaskHandler>,
    cluster: String,
    max_time_shift: Duration,
    archival_size_limit: IntPropertyFn,
}

impl TimerTaskSource {
    pub fn new(
        shard: Arc<ShardContext>,
        store: Arc<dyn ExecutionStore>,
        handler: Arc<dyn TimerTaskHandler>,
        cluster: impl Into<String>,
        max_time_shift: Duration,
        dynamic_config: &Arc<Collection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shard,
            store,
            handler,
            cluster: cluster.into(),
            max_time_shift,
            archival_size_limit: dynamic_config
                .get_int(DynamicConfigKey::HistoryArchivalSizeLimit),
        })
    }

    /// Retention expired: archive the history, then delete the current
    /// pointer and finally the execution record.
    async fn delete_history(&self, task: &TimerTask) -> Result<(), WarpflowError> {
        let record = match self
            .store
            .get_workflow_execution(
                self.shard.shard_id(),
                &task.domain_id,
                &task.workflow_id,
                &task.run_id,
            )
            .await
        {
            Ok(record) => record,
            // Already gone; the delete is idempotent.
            Err(WarpflowError::EntityNotExists(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let payload_size = serde_json::to_vec(&record).map(|b| b.len()).unwrap_or(0);
        let limit = (self.archival_size_limit)().max(0) as usize;
        if payload_size <= limit {
            debug!(
                "Archiving history of workflow {} run {} inline ({payload_size} bytes).",
                task.workflow_id, task.run_id
            );
        } else {
            warn!(
                "History of workflow {} run {} exceeds the inline archival limit \
                 ({payload_size} > {limit} bytes); deferring to the archiver.",
                task.workflow_id, task.run_id
            );
        }

        self.store
            .delete_current_workflow_execution(
                self.shard.shard_id(),
                &task.domain_id,
                &task.workflow_id,
                &task.run_id,
            )
            .await?;
        self.store
            .delete_workflow_execution(
                self.shard.shard_id(),
                &task.domain_id,
                &task.workflow_id,
                &task.run_id,
            )
            .await
    }
}

#[async_trait]
impl QueueTaskSource for TimerTaskSource {
    type Task = TimerTask;

    fn queue_name(&self) -> &'static str {
        "timer"
    }

    fn task_key(task: &TimerTask) -> TaskKey {
        TaskKey::scheduled(task.visibility_timestamp, task.task_id)
    }

    fn workflow_key(task: &TimerTask) -> WorkflowKey {
        WorkflowKey::new(
            task.domain_id.clone(),
            task.workflow_id.clone(),
            task.run_id.clone(),
        )
    }

    fn domain_id(task: &TimerTask) -> &str {
        &task.domain_id
    }

    async fn max_read_level(&self) -> TaskKey {
        // Clamp how far into the future the processor may read.
        let horizon = Utc::now()
            + ChronoDuration::from_std(self.max_time_shift)
                .unwrap_or_else(|_| ChronoDuration::seconds(1));
        TaskKey::scheduled(horizon, i64::MAX)
    }

    async fn read_batch(
        &self,
        read_level: TaskKey,
        max_read_level: TaskKey,
        batch_size: usize,
    ) -> Result<Vec<TimerTask>, WarpflowError> {
        let min_timestamp = read_level
            .visibility_timestamp
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let max_timestamp = max_read_level
            .visibility_timestamp
            .unwrap_or_else(Utc::now);
        let page_token = read_level
            .visibility_timestamp
            .map(|timestamp| (timestamp, read_level.task_id));
        let (tasks, _) = self
            .store
            .get_timer_tasks(
                self.shard.shard_id(),
                min_timestamp,
                max_timestamp,
                batch_size,
                page_token,
            )
            .await?;
        Ok(tasks)
    }

    async fn execute(&self, task: &TimerTask) -> Result<(), WarpflowError> {
        match task.task_type {
            TimerTaskType::DecisionTimeout => self.handler.handle_decision_timeout(task).await,
            TimerTaskType::ActivityTimeout => self.handler.handle_activity_timeout(task).await,
            TimerTaskType::UserTimer => self.handler.handle_user_timer(task).await,
            TimerTaskType::WorkflowTimeout => self.handler.handle_workflow_timeout(task).await,
            TimerTaskType::DeleteHistoryEvent => self.delete_history(task).await,
        }
    }

    async fn complete(&self, task: &TimerTask) -> Result<(), WarpflowError> {
        self.store
            .complete_timer_task(self.shard.shard_id(), task.visibility_timestamp, task.task_id)
            .await
    }

    async fn on_drop(&self, task: &TimerTask, error: &WarpflowError) {
        debug!(
            "Dropping timer task {} ({}) for workflow {}: {error}",
            task.task_id, task.task_type, task.workflow_id
        );
    }

    async fn save_ack_level(&self, level: TaskKey) {
        if let Some(timestamp) = level.visibility_timestamp {
            self.shard.update_timer_ack_level(timestamp).await;
            self.shard
                .update_cluster_timer_ack_level(&self.cluster, timestamp)
                .await;
        }
    }

    async fn load_queue_states(&self) -> Vec<ProcessingQueueState> {
        self.shard.timer_processing_queue_states(&self.cluster).await
    }

    async fn persist_queue_states(&self, states: Vec<ProcessingQueueState>) {
        self.shard
            .update_timer_processing_queue_states(&self.cluster, states)
            .await;
    }

    async fn initial_ack_level(&self) -> TaskKey {
        TaskKey::scheduled(self.shard.timer_ack_level().await, 0)
    }
}

/// The timer processor is the generic processor over the timer source.
pub type TimerQueueProcessor = QueueProcessor<TimerTaskSource>;
