// src/core/persistence/store.rs

//! The store traits the engine consumes, and their request/response shapes.
//!
//! Every write carries the caller's `range_id`; a stale value returns
//! `ShardOwnershipLost`. A mutation and the task rows it produces commit
//! atomically; readers never observe partial batches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::core::errors::WarpflowError;
use crate::core::execution::version_histories::VersionHistories;
use crate::core::types::{
    CreateWorkflowMode, EventId, ShardId, TaskId, UpdateWorkflowMode,
};

use super::types::{
    ActivityInfo, ChildExecutionInfo, CurrentExecution, DomainRecord, DomainTaskAttributes,
    HistoryEvent, ReplicationQueueMessage, ReplicationTask, RequestCancelInfo, ShardInfo,
    SignalInfo, TimerInfo, TimerTask, TransferTask, WorkflowExecutionInfo,
    WorkflowMutableStateRecord,
};

/// A full mutable-state snapshot: associated maps are replaced, not merged.
/// Used by create, continue-as-new, and conflict-resolve.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSnapshot {
    pub execution_info: Option<WorkflowExecutionInfo>,
    pub activity_infos: HashMap<EventId, ActivityInfo>,
    pub timer_infos: HashMap<String, TimerInfo>,
    pub child_execution_infos: HashMap<EventId, ChildExecutionInfo>,
    pub request_cancel_infos: HashMap<EventId, RequestCancelInfo>,
    pub signal_infos: HashMap<EventId, SignalInfo>,
    pub signal_requested_ids: HashSet<String>,
    pub version_histories: VersionHistories,
    pub checksum: u32,
    /// The `NextEventID` the caller observed; writes CAS against it.
    pub condition: EventId,
    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,
}

impl WorkflowSnapshot {
    pub fn execution_info(&self) -> Result<&WorkflowExecutionInfo, WarpflowError> {
        self.execution_info
            .as_ref()
            .ok_or_else(|| WarpflowError::Internal("Workflow snapshot missing execution info".to_string()))
    }
}

/// An incremental mutable-state mutation accumulated by the builder:
/// upserts/deletes per associated map, buffered-event changes, and the tasks
/// produced as side-effects.
#[derive(Debug, Clone, Default)]
pub struct WorkflowMutation {
    pub execution_info: Option<WorkflowExecutionInfo>,
    pub upsert_activity_infos: Vec<ActivityInfo>,
    pub delete_activity_infos: Vec<EventId>,
    pub upsert_timer_infos: Vec<TimerInfo>,
    pub delete_timer_infos: Vec<String>,
    pub upsert_child_execution_infos: Vec<ChildExecutionInfo>,
    pub delete_child_execution_infos: Vec<EventId>,
    pub upsert_request_cancel_infos: Vec<RequestCancelInfo>,
    pub delete_request_cancel_infos: Vec<EventId>,
    pub upsert_signal_infos: Vec<SignalInfo>,
    pub delete_signal_infos: Vec<EventId>,
    pub upsert_signal_requested_ids: Vec<String>,
    pub delete_signal_requested_ids: Vec<String>,
    pub new_buffered_events: Vec<HistoryEvent>,
    pub clear_buffered_events: bool,
    pub version_histories: Option<VersionHistories>,
    pub checksum: u32,
    /// The `NextEventID` the caller observed; the write fails with
    /// `ConditionFailed` when the stored value differs.
    pub condition: EventId,
    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,
}

impl WorkflowMutation {
    pub fn execution_info(&self) -> Result<&WorkflowExecutionInfo, WarpflowError> {
        self.execution_info
            .as_ref()
            .ok_or_else(|| WarpflowError::Internal("Workflow mutation missing execution info".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkflowExecutionRequest {
    pub shard_id: ShardId,
    pub range_id: i64,
    pub mode: CreateWorkflowMode,
    /// Required in `WorkflowIdReuse` mode.
    pub previous_run_id: Option<String>,
    pub previous_last_write_version: Option<i64>,
    pub new_workflow: WorkflowSnapshot,
}

#[derive(Debug, Clone)]
pub struct UpdateWorkflowExecutionRequest {
    pub shard_id: ShardId,
    pub range_id: i64,
    pub mode: UpdateWorkflowMode,
    pub mutation: WorkflowMutation,
    /// Present for continue-as-new: the successor run committed atomically.
    pub new_workflow: Option<WorkflowSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ConflictResolveWorkflowExecutionRequest {
    pub shard_id: ShardId,
    pub range_id: i64,
    pub mode: UpdateWorkflowMode,
    /// The run whose mutable state is replaced wholesale.
    pub reset_workflow: WorkflowSnapshot,
    /// Optional mutation of a concurrent current run, committed atomically.
    pub current_mutation: Option<WorkflowMutation>,
    /// Optional continued-as-new run seeded atomically.
    pub new_workflow: Option<WorkflowSnapshot>,
}

/// Shard row operations. `update_shard` is a CAS on `previous_range_id`.
#[async_trait]
pub trait ShardStore: Send + Sync {
    async fn create_shard(&self, shard: ShardInfo) -> Result<(), WarpflowError>;
    async fn get_shard(&self, shard_id: ShardId) -> Result<ShardInfo, WarpflowError>;
    async fn update_shard(
        &self,
        shard: ShardInfo,
        previous_range_id: i64,
    ) -> Result<(), WarpflowError>;
}

/// Workflow-execution and task-queue operations for one shard.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_workflow_execution(
        &self,
        request: CreateWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError>;

    async fn get_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<WorkflowMutableStateRecord, WarpflowError>;

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError>;

    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError>;

    async fn delete_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), WarpflowError>;

    /// Deletes the current pointer iff it still points at `run_id`.
    async fn delete_current_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), WarpflowError>;

    async fn get_current_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<CurrentExecution, WarpflowError>;

    /// Tasks with `read_level < TaskID <= max_read_level`, in task-ID order.
    /// `page_token` continues a previous page.
    async fn get_transfer_tasks(
        &self,
        shard_id: ShardId,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
        page_token: Option<TaskId>,
    ) -> Result<(Vec<TransferTask>, Option<TaskId>), WarpflowError>;

    async fn complete_transfer_task(
        &self,
        shard_id: ShardId,
        task_id: TaskId,
    ) -> Result<(), WarpflowError>;

    /// Deletes tasks with `exclusive_begin < TaskID <= inclusive_end`.
    async fn range_complete_transfer_task(
        &self,
        shard_id: ShardId,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError>;

    /// Tasks with `min_timestamp <= VisibilityTimestamp < max_timestamp`, in
    /// `(VisibilityTimestamp, TaskID)` order.
    async fn get_timer_tasks(
        &self,
        shard_id: ShardId,
        min_timestamp: DateTime<Utc>,
        max_timestamp: DateTime<Utc>,
        batch_size: usize,
        page_token: Option<(DateTime<Utc>, TaskId)>,
    ) -> Result<(Vec<TimerTask>, Option<(DateTime<Utc>, TaskId)>), WarpflowError>;

    async fn complete_timer_task(
        &self,
        shard_id: ShardId,
        visibility_timestamp: DateTime<Utc>,
        task_id: TaskId,
    ) -> Result<(), WarpflowError>;

    async fn range_complete_timer_task(
        &self,
        shard_id: ShardId,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<(), WarpflowError>;

    async fn get_replication_tasks(
        &self,
        shard_id: ShardId,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
    ) -> Result<Vec<ReplicationTask>, WarpflowError>;

    async fn complete_replication_task(
        &self,
        shard_id: ShardId,
        task_id: TaskId,
    ) -> Result<(), WarpflowError>;

    async fn range_complete_replication_task(
        &self,
        shard_id: ShardId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError>;

    // --- History-replication DLQ, keyed by source cluster ---

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        task: ReplicationTask,
    ) -> Result<(), WarpflowError>;

    async fn get_replication_tasks_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
    ) -> Result<Vec<ReplicationTask>, WarpflowError>;

    async fn get_replication_dlq_size(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
    ) -> Result<usize, WarpflowError>;

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        task_id: TaskId,
    ) -> Result<(), WarpflowError>;

    /// Deletes DLQ tasks with `exclusive_begin < TaskID <= inclusive_end`.
    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError>;
}

/// Domain metadata operations.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Persists a new domain. Fails with `BadRequest` when the name is taken.
    async fn create_domain(&self, record: DomainRecord) -> Result<String, WarpflowError>;

    async fn get_domain_by_name(&self, name: &str) -> Result<DomainRecord, WarpflowError>;

    async fn get_domain_by_id(&self, id: &str) -> Result<DomainRecord, WarpflowError>;

    /// Read-modify-write update; callers pass the record with the metadata
    /// notification version they observed via [`DomainStore::get_metadata`].
    async fn update_domain(&self, record: DomainRecord) -> Result<(), WarpflowError>;

    async fn delete_domain_by_name(&self, name: &str) -> Result<(), WarpflowError>;

    async fn list_domains(
        &self,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<(Vec<DomainRecord>, Option<String>), WarpflowError>;

    /// The current domain notification version; each successful create or
    /// update advances it by one.
    async fn get_metadata(&self) -> Result<i64, WarpflowError>;
}

/// The durable domain-replication queue plus its per-source DLQ.
#[async_trait]
pub trait DomainReplicationQueue: Send + Sync {
    /// Appends a message; IDs are monotonic and gap-free per publisher.
    async fn publish(&self, payload: DomainTaskAttributes) -> Result<i64, WarpflowError>;

    /// Messages with `MessageID > last_message_id`, up to `max_count`.
    async fn get_messages(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError>;

    async fn update_ack_level(&self, cluster: &str, message_id: i64) -> Result<(), WarpflowError>;

    async fn get_ack_levels(&self) -> Result<HashMap<String, i64>, WarpflowError>;

    async fn publish_to_dlq(
        &self,
        source_cluster: &str,
        message: ReplicationQueueMessage,
    ) -> Result<(), WarpflowError>;

    async fn get_dlq_messages(
        &self,
        source_cluster: &str,
        last_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError>;

    async fn get_dlq_size(&self, source_cluster: &str) -> Result<usize, WarpflowError>;

    async fn delete_dlq_message(
        &self,
        source_cluster: &str,
        message_id: i64,
    ) -> Result<(), WarpflowError>;

    /// Deletes DLQ messages with `exclusive_begin < MessageID <= inclusive_end`.
    async fn range_delete_dlq_messages(
        &self,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<(), WarpflowError>;
}
