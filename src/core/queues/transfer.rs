// src/core/queues/transfer.rs

//! The transfer queue: immediate side-effects of mutable-state mutations
//! (decision/activity dispatch, close/cancel/signal/child-start plumbing),
//! delivered in task-ID order per shard.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::core::errors::WarpflowError;
use crate::core::persistence::store::ExecutionStore;
use crate::core::persistence::types::{ProcessingQueueState, TaskKey, TransferTask};
use crate::core::shard::ShardContext;
use crate::core::types::{TransferTaskType, WorkflowKey};

use super::processor::{QueueProcessor, QueueTaskSource};

/// One executor per transfer-task kind. Dispatching decisions and activities
/// to pollers is the frontend's business; the engine only routes by tag, so
/// adding a kind means adding one method here and nothing in the processor.
#[async_trait]
pub trait TransferTaskHandler: Send + Sync + 'static {
    async fn handle_decision_task(&self, task: &TransferTask) -> Result<(), WarpflowError>;
    async fn handle_activity_task(&self, task: &TransferTask) -> Result<(), WarpflowError>;
    async fn handle_close_execution(&self, task: &TransferTask) -> Result<(), WarpflowError>;
    async fn handle_cancel_execution(&self, task: &TransferTask) -> Result<(), WarpflowError>;
    async fn handle_signal_execution(&self, task: &TransferTask) -> Result<(), WarpflowError>;
    async fn handle_start_child_execution(&self, task: &TransferTask)
    -> Result<(), WarpflowError>;
}

/// A handler that acknowledges every task without side effects. Useful in
/// deployments that wire dispatch elsewhere, and in tests.
pub struct NoopTransferTaskHandler;

#[async_trait]
impl TransferTaskHandler for NoopTransferTaskHandler {
    async fn handle_decision_task(&self, _task: &TransferTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_activity_task(&self, _task: &TransferTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_close_execution(&self, _task: &TransferTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_cancel_execution(&self, _task: &TransferTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_signal_execution(&self, _task: &TransferTask) -> Result<(), WarpflowError> {
        Ok(())
    }
    async fn handle_start_child_execution(
        &self,
        _task: &TransferTask,
    ) -> Result<(), WarpflowError> {
        Ok(())
    }
}

/// The transfer task source feeding the generic queue processor.
pub struct TransferTaskSource {
    shard: Arc<ShardContext>,
    store: Arc<dyn ExecutionStore>,
    handler: Arc<dyn TransferTaskHandler>,
    cluster: String,
}

impl TransferTaskSource {
    pub fn new(
        shard: Arc<ShardContext>,
        store: Arc<dyn ExecutionStore>,
        handler: Arc<dyn TransferTaskHandler>,
        cluster: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shard,
            store,
            handler,
            cluster: cluster.into(),
        })
    }
}

#[async_trait]
impl QueueTaskSource for TransferTaskSource {
    type Task = TransferTask;

    fn queue_name(&self) -> &'static str {
        "transfer"
    }

    fn task_key(task: &TransferTask) -> TaskKey {
        TaskKey::immediate(task.task_id)
    }

    fn workflow_key(task: &TransferTask) -> WorkflowKey {
        WorkflowKey::new(
            task.domain_id.clone(),
            task.workflow_id.clone(),
            task.run_id.clone(),
        )
    }

    fn domain_id(task: &TransferTask) -> &str {
        &task.domain_id
    }

    async fn max_read_level(&self) -> TaskKey {
        TaskKey::immediate(self.shard.transfer_max_read_level().await)
    }

    async fn read_batch(
        &self,
        read_level: TaskKey,
        max_read_level: TaskKey,
        batch_size: usize,
    ) -> Result<Vec<TransferTask>, WarpflowError> {
        let (tasks, _) = self
            .store
            .get_transfer_tasks(
                self.shard.shard_id(),
                read_level.task_id,
                max_read_level.task_id,
                batch_size,
                None,
            )
            .await?;
        Ok(tasks)
    }

    async fn execute(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        match task.task_type {
            TransferTaskType::DecisionTask => self.handler.handle_decision_task(task).await,
            TransferTaskType::ActivityTask => self.handler.handle_activity_task(task).await,
            TransferTaskType::CloseExecution => self.handler.handle_close_execution(task).await,
            TransferTaskType::CancelExecution => self.handler.handle_cancel_execution(task).await,
            TransferTaskType::SignalExecution => self.handler.handle_signal_execution(task).await,
            TransferTaskType::StartChildExecution => {
                self.handler.handle_start_child_execution(task).await
            }
        }
    }

    async fn complete(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.store
            .complete_transfer_task(self.shard.shard_id(), task.task_id)
            .await
    }

    async fn on_drop(&self, task: &TransferTask, error: &WarpflowError) {
        debug!(
            "Dropping transfer task {} ({}) for workflow {}: {error}",
            task.task_id, task.task_type, task.workflow_id
        );
    }

    async fn save_ack_level(&self, level: TaskKey) {
        self.shard.update_transfer_ack_level(level.task_id).await;
        self.shard
            .update_cluster_transfer_ack_level(&self.cluster, level.task_id)
            .await;
    }

    async fn load_queue_states(&self) -> Vec<ProcessingQueueState> {
        self.shard
            .transfer_processing_queue_states(&self.cluster)
            .await
    }

    async fn persist_queue_states(&self, states: Vec<ProcessingQueueState>) {
        self.shard
            .update_transfer_processing_queue_states(&self.cluster, states)
            .await;
    }

    async fn initial_ack_level(&self) -> TaskKey {
        TaskKey::immediate(self.shard.transfer_ack_level().await)
    }
}

/// The transfer processor is the generic processor over the transfer source.
pub type TransferQueueProcessor = QueueProcessor<TransferTaskSource>;
