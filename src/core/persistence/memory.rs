// src/core/persistence/memory.rs

//! The in-memory reference store. It implements the full store contract and
//! is what the test suites run against; external drivers must match its
//! observable behavior.
//!
//! Each top-level area is guarded by one `parking_lot::RwLock`, so a
//! mutable-state mutation and the task rows it produces commit under a single
//! writer section and readers never observe partial batches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::core::errors::{WarpflowError, WorkflowAlreadyStarted};
use crate::core::types::{
    CreateWorkflowMode, EMPTY_VERSION, ShardId, TaskId, UpdateWorkflowMode, Version, WorkflowState,
    validate_state_close_status,
};

use super::store::{
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest,
    DomainReplicationQueue, DomainStore, ExecutionStore, ShardStore,
    UpdateWorkflowExecutionRequest, WorkflowMutation, WorkflowSnapshot,
};
use super::types::{
    CurrentExecution, DomainRecord, DomainTaskAttributes, ReplicationQueueMessage,
    ReplicationTask, ShardInfo, TimerTask, TransferTask, WorkflowMutableStateRecord,
};

type ExecutionKey = (ShardId, String, String, String);
type CurrentKey = (ShardId, String, String);

#[derive(Default)]
struct ExecutionState {
    records: HashMap<ExecutionKey, WorkflowMutableStateRecord>,
    current: HashMap<CurrentKey, CurrentExecution>,
    transfer: HashMap<ShardId, BTreeMap<TaskId, TransferTask>>,
    timer: HashMap<ShardId, BTreeMap<(DateTime<Utc>, TaskId), TimerTask>>,
    replication: HashMap<ShardId, BTreeMap<TaskId, ReplicationTask>>,
    replication_dlq: HashMap<(ShardId, String), BTreeMap<TaskId, ReplicationTask>>,
}

#[derive(Default)]
struct DomainState {
    by_name: HashMap<String, DomainRecord>,
    ids_to_names: HashMap<String, String>,
    notification_version: i64,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<ReplicationQueueMessage>,
    next_message_id: i64,
    ack_levels: HashMap<String, i64>,
    dlq: HashMap<String, BTreeMap<i64, ReplicationQueueMessage>>,
}

/// The in-memory store. Cheap to construct; every test starts from an empty
/// one.
#[derive(Default)]
pub struct MemoryStore {
    shards: RwLock<HashMap<ShardId, ShardInfo>>,
    executions: RwLock<ExecutionState>,
    domains: RwLock<DomainState>,
    queue: RwLock<QueueState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes carrying a `range_id` older than the stored lease.
    /// A shard with no stored row passes, so components can be exercised
    /// without a controller.
    fn verify_range_id(&self, shard_id: ShardId, range_id: i64) -> Result<(), WarpflowError> {
        let shards = self.shards.read();
        if let Some(shard) = shards.get(&shard_id)
            && range_id < shard.range_id
        {
            return Err(WarpflowError::ShardOwnershipLost {
                shard_id,
                owner: shard.owner.clone(),
            });
        }
        Ok(())
    }
}

fn snapshot_last_write_version(snapshot: &WorkflowSnapshot) -> Version {
    snapshot
        .version_histories
        .current()
        .ok()
        .and_then(|history| history.last_item().ok())
        .map(|item| item.version)
        .unwrap_or(EMPTY_VERSION)
}

fn mutation_last_write_version(mutation: &WorkflowMutation) -> Version {
    mutation
        .version_histories
        .as_ref()
        .and_then(|histories| histories.current().ok())
        .and_then(|history| history.last_item().ok())
        .map(|item| item.version)
        .unwrap_or(EMPTY_VERSION)
}

fn record_from_snapshot(snapshot: &WorkflowSnapshot) -> Result<WorkflowMutableStateRecord, WarpflowError> {
    let info = snapshot.execution_info()?.clone();
    validate_state_close_status(info.state, info.close_status)?;
    Ok(WorkflowMutableStateRecord {
        execution_info: info,
        activity_infos: snapshot.activity_infos.clone(),
        timer_infos: snapshot.timer_infos.clone(),
        child_execution_infos: snapshot.child_execution_infos.clone(),
        request_cancel_infos: snapshot.request_cancel_infos.clone(),
        signal_infos: snapshot.signal_infos.clone(),
        signal_requested_ids: snapshot.signal_requested_ids.clone(),
        buffered_events: Vec::new(),
        version_histories: snapshot.version_histories.clone(),
        checksum: snapshot.checksum,
    })
}

fn apply_mutation(
    record: &mut WorkflowMutableStateRecord,
    mutation: &WorkflowMutation,
) -> Result<(), WarpflowError> {
    let info = mutation.execution_info()?.clone();
    validate_state_close_status(info.state, info.close_status)?;
    record.execution_info = info;

    for activity in &mutation.upsert_activity_infos {
        record.activity_infos.insert(activity.schedule_id, activity.clone());
    }
    for schedule_id in &mutation.delete_activity_infos {
        record.activity_infos.remove(schedule_id);
    }
    for timer in &mutation.upsert_timer_infos {
        record.timer_infos.insert(timer.timer_id.clone(), timer.clone());
    }
    for timer_id in &mutation.delete_timer_infos {
        record.timer_infos.remove(timer_id);
    }
    for child in &mutation.upsert_child_execution_infos {
        record
            .child_execution_infos
            .insert(child.initiated_id, child.clone());
    }
    for initiated_id in &mutation.delete_child_execution_infos {
        record.child_execution_infos.remove(initiated_id);
    }
    for cancel in &mutation.upsert_request_cancel_infos {
        record
            .request_cancel_infos
            .insert(cancel.initiated_id, cancel.clone());
    }
    for initiated_id in &mutation.delete_request_cancel_infos {
        record.request_cancel_infos.remove(initiated_id);
    }
    for signal in &mutation.upsert_signal_infos {
        record.signal_infos.insert(signal.initiated_id, signal.clone());
    }
    for initiated_id in &mutation.delete_signal_infos {
        record.signal_infos.remove(initiated_id);
    }
    for signal_id in &mutation.upsert_signal_requested_ids {
        record.signal_requested_ids.insert(signal_id.clone());
    }
    for signal_id in &mutation.delete_signal_requested_ids {
        record.signal_requested_ids.remove(signal_id);
    }

    if mutation.clear_buffered_events {
        record.buffered_events.clear();
    }
    record
        .buffered_events
        .extend(mutation.new_buffered_events.iter().cloned());

    if let Some(histories) = &mutation.version_histories {
        record.version_histories = histories.clone();
    }
    record.checksum = mutation.checksum;
    Ok(())
}

fn insert_snapshot_tasks(state: &mut ExecutionState, shard_id: ShardId, snapshot: &WorkflowSnapshot) {
    insert_tasks(
        state,
        shard_id,
        &snapshot.transfer_tasks,
        &snapshot.timer_tasks,
        &snapshot.replication_tasks,
    );
}

fn insert_mutation_tasks(state: &mut ExecutionState, shard_id: ShardId, mutation: &WorkflowMutation) {
    insert_tasks(
        state,
        shard_id,
        &mutation.transfer_tasks,
        &mutation.timer_tasks,
        &mutation.replication_tasks,
    );
}

fn insert_tasks(
    state: &mut ExecutionState,
    shard_id: ShardId,
    transfer: &[TransferTask],
    timer: &[TimerTask],
    replication: &[ReplicationTask],
) {
    let transfer_queue = state.transfer.entry(shard_id).or_default();
    for task in transfer {
        transfer_queue.insert(task.task_id, task.clone());
    }
    let timer_queue = state.timer.entry(shard_id).or_default();
    for task in timer {
        timer_queue.insert((task.visibility_timestamp, task.task_id), task.clone());
    }
    let replication_queue = state.replication.entry(shard_id).or_default();
    for task in replication {
        replication_queue.insert(task.task_id, task.clone());
    }
}

#[async_trait]
impl ShardStore for MemoryStore {
    async fn create_shard(&self, shard: ShardInfo) -> Result<(), WarpflowError> {
        let mut shards = self.shards.write();
        if shards.contains_key(&shard.shard_id) {
            return Err(WarpflowError::BadRequest(format!(
                "Shard {} already exists",
                shard.shard_id
            )));
        }
        shards.insert(shard.shard_id, shard);
        Ok(())
    }

    async fn get_shard(&self, shard_id: ShardId) -> Result<ShardInfo, WarpflowError> {
        self.shards
            .read()
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| WarpflowError::EntityNotExists(format!("Shard {shard_id} not found")))
    }

    async fn update_shard(
        &self,
        shard: ShardInfo,
        previous_range_id: i64,
    ) -> Result<(), WarpflowError> {
        let mut shards = self.shards.write();
        let existing = shards.get_mut(&shard.shard_id).ok_or_else(|| {
            WarpflowError::EntityNotExists(format!("Shard {} not found", shard.shard_id))
        })?;
        if existing.range_id != previous_range_id {
            return Err(WarpflowError::ShardOwnershipLost {
                shard_id: shard.shard_id,
                owner: existing.owner.clone(),
            });
        }
        *existing = shard;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_workflow_execution(
        &self,
        request: CreateWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError> {
        self.verify_range_id(request.shard_id, request.range_id)?;
        let record = record_from_snapshot(&request.new_workflow)?;
        let info = &record.execution_info;
        let state = info.state;

        match request.mode {
            CreateWorkflowMode::BrandNew | CreateWorkflowMode::WorkflowIdReuse => {
                if !matches!(state, WorkflowState::Created | WorkflowState::Running) {
                    return Err(WarpflowError::Internal(format!(
                        "Invalid workflow state {state} for create mode {:?}",
                        request.mode
                    )));
                }
            }
            CreateWorkflowMode::Zombie => {
                if state != WorkflowState::Zombie {
                    return Err(WarpflowError::Internal(format!(
                        "Invalid workflow state {state} for zombie create"
                    )));
                }
            }
        }

        let mut executions = self.executions.write();
        let execution_key = (
            request.shard_id,
            info.domain_id.clone(),
            info.workflow_id.clone(),
            info.run_id.clone(),
        );
        if executions.records.contains_key(&execution_key) {
            return Err(WarpflowError::ConditionFailed(format!(
                "Workflow execution {} run {} already exists",
                info.workflow_id, info.run_id
            )));
        }

        let current_key = (
            request.shard_id,
            info.domain_id.clone(),
            info.workflow_id.clone(),
        );
        let existing_current = executions.current.get(&current_key).cloned();

        match request.mode {
            CreateWorkflowMode::BrandNew => {
                if let Some(current) = existing_current {
                    return Err(WarpflowError::AlreadyStarted(WorkflowAlreadyStarted {
                        start_request_id: current.start_request_id,
                        run_id: current.run_id,
                        state: current.state,
                        close_status: current.close_status,
                        last_write_version: current.last_write_version,
                    }));
                }
            }
            CreateWorkflowMode::WorkflowIdReuse => {
                let current = existing_current.ok_or_else(|| {
                    WarpflowError::ConditionFailed(
                        "Workflow ID reuse requires an existing current execution".to_string(),
                    )
                })?;
                let previous_run_id = request.previous_run_id.as_deref().unwrap_or_default();
                let previous_version = request.previous_last_write_version.unwrap_or(EMPTY_VERSION);
                if current.run_id != previous_run_id
                    || current.last_write_version != previous_version
                {
                    return Err(WarpflowError::ConditionFailed(format!(
                        "Current execution {} (version {}) does not match previous run {} (version {})",
                        current.run_id, current.last_write_version, previous_run_id, previous_version
                    )));
                }
                if current.state != WorkflowState::Completed {
                    return Err(WarpflowError::ConditionFailed(format!(
                        "Current execution {} is still {}, cannot reuse the workflow ID",
                        current.run_id, current.state
                    )));
                }
            }
            CreateWorkflowMode::Zombie => {
                if let Some(current) = &existing_current
                    && current.run_id == info.run_id
                {
                    return Err(WarpflowError::BadRequest(format!(
                        "Zombie create collides with the current run {}",
                        current.run_id
                    )));
                }
            }
        }

        if request.mode != CreateWorkflowMode::Zombie {
            executions.current.insert(
                current_key,
                CurrentExecution {
                    run_id: info.run_id.clone(),
                    start_request_id: info.create_request_id.clone(),
                    state: info.state,
                    close_status: info.close_status,
                    last_write_version: snapshot_last_write_version(&request.new_workflow),
                },
            );
        }
        executions.records.insert(execution_key, record);
        insert_snapshot_tasks(&mut executions, request.shard_id, &request.new_workflow);
        Ok(())
    }

    async fn get_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<WorkflowMutableStateRecord, WarpflowError> {
        self.executions
            .read()
            .records
            .get(&(
                shard_id,
                domain_id.to_string(),
                workflow_id.to_string(),
                run_id.to_string(),
            ))
            .cloned()
            .ok_or_else(|| {
                WarpflowError::EntityNotExists(format!(
                    "Workflow execution {workflow_id} run {run_id} not found"
                ))
            })
    }

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError> {
        self.verify_range_id(request.shard_id, request.range_id)?;
        let info = request.mutation.execution_info()?.clone();

        let mut executions = self.executions.write();
        let execution_key = (
            request.shard_id,
            info.domain_id.clone(),
            info.workflow_id.clone(),
            info.run_id.clone(),
        );
        let stored = executions.records.get(&execution_key).ok_or_else(|| {
            WarpflowError::EntityNotExists(format!(
                "Workflow execution {} run {} not found",
                info.workflow_id, info.run_id
            ))
        })?;
        if stored.execution_info.next_event_id != request.mutation.condition {
            return Err(WarpflowError::ConditionFailed(format!(
                "Next event ID {} does not match condition {}",
                stored.execution_info.next_event_id, request.mutation.condition
            )));
        }

        let current_key = (
            request.shard_id,
            info.domain_id.clone(),
            info.workflow_id.clone(),
        );
        match request.mode {
            UpdateWorkflowMode::UpdateCurrent => {
                let current = executions.current.get(&current_key).ok_or_else(|| {
                    WarpflowError::Internal(format!(
                        "No current execution to update for workflow {}",
                        info.workflow_id
                    ))
                })?;
                if current.run_id != info.run_id {
                    return Err(WarpflowError::Internal(format!(
                        "Current execution points at run {}, not the updated run {}",
                        current.run_id, info.run_id
                    )));
                }
            }
            UpdateWorkflowMode::BypassCurrent => {
                if let Some(current) = executions.current.get(&current_key)
                    && current.run_id == info.run_id
                {
                    return Err(WarpflowError::BadRequest(format!(
                        "Cannot bypass the current pointer while updating the current run {}",
                        info.run_id
                    )));
                }
            }
        }

        {
            let record = executions
                .records
                .get_mut(&execution_key)
                .expect("checked above");
            apply_mutation(record, &request.mutation)?;
        }
        insert_mutation_tasks(&mut executions, request.shard_id, &request.mutation);

        match (&request.new_workflow, request.mode) {
            (Some(new_snapshot), _) => {
                // Continue-as-new: seed the successor and move the pointer.
                let new_record = record_from_snapshot(new_snapshot)?;
                let new_info = new_record.execution_info.clone();
                let new_key = (
                    request.shard_id,
                    new_info.domain_id.clone(),
                    new_info.workflow_id.clone(),
                    new_info.run_id.clone(),
                );
                if executions.records.contains_key(&new_key) {
                    return Err(WarpflowError::ConditionFailed(format!(
                        "Continued-as-new run {} already exists",
                        new_info.run_id
                    )));
                }
                executions.records.insert(new_key, new_record);
                insert_snapshot_tasks(&mut executions, request.shard_id, new_snapshot);
                if request.mode == UpdateWorkflowMode::UpdateCurrent {
                    executions.current.insert(
                        current_key,
                        CurrentExecution {
                            run_id: new_info.run_id.clone(),
                            start_request_id: new_info.create_request_id.clone(),
                            state: new_info.state,
                            close_status: new_info.close_status,
                            last_write_version: snapshot_last_write_version(new_snapshot),
                        },
                    );
                }
            }
            (None, UpdateWorkflowMode::UpdateCurrent) => {
                executions.current.insert(
                    current_key,
                    CurrentExecution {
                        run_id: info.run_id.clone(),
                        start_request_id: info.create_request_id.clone(),
                        state: info.state,
                        close_status: info.close_status,
                        last_write_version: mutation_last_write_version(&request.mutation),
                    },
                );
            }
            (None, UpdateWorkflowMode::BypassCurrent) => {}
        }
        Ok(())
    }

    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), WarpflowError> {
        self.verify_range_id(request.shard_id, request.range_id)?;
        let reset_info = request.reset_workflow.execution_info()?.clone();

        let mut executions = self.executions.write();
        let reset_key = (
            request.shard_id,
            reset_info.domain_id.clone(),
            reset_info.workflow_id.clone(),
            reset_info.run_id.clone(),
        );
        let stored = executions.records.get(&reset_key).ok_or_else(|| {
            WarpflowError::EntityNotExists(format!(
                "Workflow execution {} run {} not found",
                reset_info.workflow_id, reset_info.run_id
            ))
        })?;
        if stored.execution_info.next_event_id != request.reset_workflow.condition {
            return Err(WarpflowError::ConditionFailed(format!(
                "Next event ID {} does not match reset condition {}",
                stored.execution_info.next_event_id, request.reset_workflow.condition
            )));
        }

        let current_key = (
            request.shard_id,
            reset_info.domain_id.clone(),
            reset_info.workflow_id.clone(),
        );
        if request.mode == UpdateWorkflowMode::BypassCurrent
            && let Some(current) = executions.current.get(&current_key)
            && current.run_id == reset_info.run_id
        {
            return Err(WarpflowError::BadRequest(format!(
                "Conflict resolve cannot bypass the current pointer for the current run {}",
                reset_info.run_id
            )));
        }

        if let Some(current_mutation) = &request.current_mutation {
            let current_info = current_mutation.execution_info()?.clone();
            let current_record_key = (
                request.shard_id,
                current_info.domain_id.clone(),
                current_info.workflow_id.clone(),
                current_info.run_id.clone(),
            );
            let stored_current = executions.records.get(&current_record_key).ok_or_else(|| {
                WarpflowError::EntityNotExists(format!(
                    "Concurrent execution run {} not found",
                    current_info.run_id
                ))
            })?;
            if stored_current.execution_info.next_event_id != current_mutation.condition {
                return Err(WarpflowError::ConditionFailed(format!(
                    "Next event ID {} does not match concurrent-run condition {}",
                    stored_current.execution_info.next_event_id, current_mutation.condition
                )));
            }
            let record = executions
                .records
                .get_mut(&current_record_key)
                .expect("checked above");
            apply_mutation(record, current_mutation)?;
            insert_mutation_tasks(&mut executions, request.shard_id, current_mutation);
        }

        // Replace the reset run's mutable state wholesale.
        let reset_record = record_from_snapshot(&request.reset_workflow)?;
        executions.records.insert(reset_key, reset_record);
        insert_snapshot_tasks(&mut executions, request.shard_id, &request.reset_workflow);

        let mut pointer_target = (
            reset_info.clone(),
            snapshot_last_write_version(&request.reset_workflow),
        );
        if let Some(new_snapshot) = &request.new_workflow {
            let new_record = record_from_snapshot(new_snapshot)?;
            let new_info = new_record.execution_info.clone();
            let new_key = (
                request.shard_id,
                new_info.domain_id.clone(),
                new_info.workflow_id.clone(),
                new_info.run_id.clone(),
            );
            executions.records.insert(new_key, new_record);
            insert_snapshot_tasks(&mut executions, request.shard_id, new_snapshot);
            pointer_target = (new_info, snapshot_last_write_version(new_snapshot));
        }

        if request.mode == UpdateWorkflowMode::UpdateCurrent {
            let (info, last_write_version) = pointer_target;
            executions.current.insert(
                current_key,
                CurrentExecution {
                    run_id: info.run_id.clone(),
                    start_request_id: info.create_request_id.clone(),
                    state: info.state,
                    close_status: info.close_status,
                    last_write_version,
                },
            );
        }
        Ok(())
    }

    async fn delete_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), WarpflowError> {
        self.executions.write().records.remove(&(
            shard_id,
            domain_id.to_string(),
            workflow_id.to_string(),
            run_id.to_string(),
        ));
        Ok(())
    }

    async fn delete_current_workflow_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), WarpflowError> {
        let mut executions = self.executions.write();
        let key = (shard_id, domain_id.to_string(), workflow_id.to_string());
        if let Some(current) = executions.current.get(&key)
            && current.run_id == run_id
        {
            executions.current.remove(&key);
        }
        Ok(())
    }

    async fn get_current_execution(
        &self,
        shard_id: ShardId,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<CurrentExecution, WarpflowError> {
        self.executions
            .read()
            .current
            .get(&(shard_id, domain_id.to_string(), workflow_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                WarpflowError::EntityNotExists(format!(
                    "No current execution for workflow {workflow_id}"
                ))
            })
    }

    async fn get_transfer_tasks(
        &self,
        shard_id: ShardId,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
        page_token: Option<TaskId>,
    ) -> Result<(Vec<TransferTask>, Option<TaskId>), WarpflowError> {
        let executions = self.executions.read();
        let Some(queue) = executions.transfer.get(&shard_id) else {
            return Ok((Vec::new(), None));
        };
        let lower = page_token.unwrap_or(read_level);
        if lower >= max_read_level {
            return Ok((Vec::new(), None));
        }
        let mut tasks = Vec::new();
        let mut more = false;
        for (_, task) in queue.range((lower + 1)..=max_read_level) {
            if tasks.len() == batch_size {
                more = true;
                break;
            }
            tasks.push(task.clone());
        }
        let next_token = if more {
            tasks.last().map(|t| t.task_id)
        } else {
            None
        };
        Ok((tasks, next_token))
    }

    async fn complete_transfer_task(
        &self,
        shard_id: ShardId,
        task_id: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().transfer.get_mut(&shard_id) {
            queue.remove(&task_id);
        }
        Ok(())
    }

    async fn range_complete_transfer_task(
        &self,
        shard_id: ShardId,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().transfer.get_mut(&shard_id) {
            queue.retain(|task_id, _| *task_id <= exclusive_begin || *task_id > inclusive_end);
        }
        Ok(())
    }

    async fn get_timer_tasks(
        &self,
        shard_id: ShardId,
        min_timestamp: DateTime<Utc>,
        max_timestamp: DateTime<Utc>,
        batch_size: usize,
        page_token: Option<(DateTime<Utc>, TaskId)>,
    ) -> Result<(Vec<TimerTask>, Option<(DateTime<Utc>, TaskId)>), WarpflowError> {
        let executions = self.executions.read();
        let Some(queue) = executions.timer.get(&shard_id) else {
            return Ok((Vec::new(), None));
        };
        let mut tasks = Vec::new();
        let mut more = false;
        for ((timestamp, task_id), task) in queue.iter() {
            if *timestamp >= max_timestamp {
                break;
            }
            if *timestamp < min_timestamp {
                continue;
            }
            if let Some((token_ts, token_id)) = page_token
                && (*timestamp, *task_id) <= (token_ts, token_id)
            {
                continue;
            }
            if tasks.len() == batch_size {
                more = true;
                break;
            }
            tasks.push(task.clone());
        }
        let next_token = if more {
            tasks.last().map(|t| (t.visibility_timestamp, t.task_id))
        } else {
            None
        };
        Ok((tasks, next_token))
    }

    async fn complete_timer_task(
        &self,
        shard_id: ShardId,
        visibility_timestamp: DateTime<Utc>,
        task_id: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().timer.get_mut(&shard_id) {
            queue.remove(&(visibility_timestamp, task_id));
        }
        Ok(())
    }

    async fn range_complete_timer_task(
        &self,
        shard_id: ShardId,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().timer.get_mut(&shard_id) {
            queue.retain(|(timestamp, _), _| *timestamp < inclusive_begin || *timestamp >= exclusive_end);
        }
        Ok(())
    }

    async fn get_replication_tasks(
        &self,
        shard_id: ShardId,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
    ) -> Result<Vec<ReplicationTask>, WarpflowError> {
        if read_level >= max_read_level {
            return Ok(Vec::new());
        }
        let executions = self.executions.read();
        let Some(queue) = executions.replication.get(&shard_id) else {
            return Ok(Vec::new());
        };
        Ok(queue
            .range((read_level + 1)..=max_read_level)
            .take(batch_size)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn complete_replication_task(
        &self,
        shard_id: ShardId,
        task_id: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().replication.get_mut(&shard_id) {
            queue.remove(&task_id);
        }
        Ok(())
    }

    async fn range_complete_replication_task(
        &self,
        shard_id: ShardId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self.executions.write().replication.get_mut(&shard_id) {
            queue.retain(|task_id, _| *task_id > inclusive_end);
        }
        Ok(())
    }

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        task: ReplicationTask,
    ) -> Result<(), WarpflowError> {
        self.executions
            .write()
            .replication_dlq
            .entry((shard_id, source_cluster.to_string()))
            .or_default()
            .insert(task.task_id, task);
        Ok(())
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        read_level: TaskId,
        max_read_level: TaskId,
        batch_size: usize,
    ) -> Result<Vec<ReplicationTask>, WarpflowError> {
        if read_level >= max_read_level {
            return Ok(Vec::new());
        }
        let executions = self.executions.read();
        let Some(queue) = executions
            .replication_dlq
            .get(&(shard_id, source_cluster.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(queue
            .range((read_level + 1)..=max_read_level)
            .take(batch_size)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn get_replication_dlq_size(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
    ) -> Result<usize, WarpflowError> {
        Ok(self
            .executions
            .read()
            .replication_dlq
            .get(&(shard_id, source_cluster.to_string()))
            .map(|queue| queue.len())
            .unwrap_or(0))
    }

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        task_id: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self
            .executions
            .write()
            .replication_dlq
            .get_mut(&(shard_id, source_cluster.to_string()))
        {
            queue.remove(&task_id);
        }
        Ok(())
    }

    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: ShardId,
        source_cluster: &str,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError> {
        if let Some(queue) = self
            .executions
            .write()
            .replication_dlq
            .get_mut(&(shard_id, source_cluster.to_string()))
        {
            queue.retain(|task_id, _| *task_id <= exclusive_begin || *task_id > inclusive_end);
        }
        Ok(())
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn create_domain(&self, mut record: DomainRecord) -> Result<String, WarpflowError> {
        let mut domains = self.domains.write();
        if domains.by_name.contains_key(&record.info.name) {
            return Err(WarpflowError::BadRequest(format!(
                "Domain '{}' already exists",
                record.info.name
            )));
        }
        record.notification_version = domains.notification_version;
        domains.notification_version += 1;
        let id = record.info.id.clone();
        domains
            .ids_to_names
            .insert(id.clone(), record.info.name.clone());
        domains.by_name.insert(record.info.name.clone(), record);
        Ok(id)
    }

    async fn get_domain_by_name(&self, name: &str) -> Result<DomainRecord, WarpflowError> {
        self.domains
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| WarpflowError::EntityNotExists(format!("Domain '{name}' not found")))
    }

    async fn get_domain_by_id(&self, id: &str) -> Result<DomainRecord, WarpflowError> {
        let domains = self.domains.read();
        domains
            .ids_to_names
            .get(id)
            .and_then(|name| domains.by_name.get(name))
            .cloned()
            .ok_or_else(|| WarpflowError::EntityNotExists(format!("Domain id '{id}' not found")))
    }

    async fn update_domain(&self, mut record: DomainRecord) -> Result<(), WarpflowError> {
        let mut domains = self.domains.write();
        if !domains.by_name.contains_key(&record.info.name) {
            return Err(WarpflowError::EntityNotExists(format!(
                "Domain '{}' not found",
                record.info.name
            )));
        }
        record.notification_version = domains.notification_version;
        domains.notification_version += 1;
        domains.by_name.insert(record.info.name.clone(), record);
        Ok(())
    }

    async fn delete_domain_by_name(&self, name: &str) -> Result<(), WarpflowError> {
        let mut domains = self.domains.write();
        if let Some(record) = domains.by_name.remove(name) {
            domains.ids_to_names.remove(&record.info.id);
        }
        Ok(())
    }

    async fn list_domains(
        &self,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<(Vec<DomainRecord>, Option<String>), WarpflowError> {
        let domains = self.domains.read();
        let mut names: Vec<&String> = domains.by_name.keys().collect();
        names.sort();
        let records: Vec<DomainRecord> = names
            .into_iter()
            .filter(|name| match &page_token {
                Some(token) => name.as_str() > token.as_str(),
                None => true,
            })
            .take(page_size)
            .map(|name| domains.by_name[name].clone())
            .collect();
        let next_token = if records.len() == page_size {
            records.last().map(|r| r.info.name.clone())
        } else {
            None
        };
        Ok((records, next_token))
    }

    async fn get_metadata(&self) -> Result<i64, WarpflowError> {
        Ok(self.domains.read().notification_version)
    }
}

#[async_trait]
impl DomainReplicationQueue for MemoryStore {
    async fn publish(&self, payload: DomainTaskAttributes) -> Result<i64, WarpflowError> {
        let mut queue = self.queue.write();
        queue.next_message_id += 1;
        let message_id = queue.next_message_id;
        queue.messages.push(ReplicationQueueMessage {
            message_id,
            payload,
        });
        Ok(message_id)
    }

    async fn get_messages(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError> {
        Ok(self
            .queue
            .read()
            .messages
            .iter()
            .filter(|m| m.message_id > last_message_id)
            .take(max_count)
            .cloned()
            .collect())
    }

    async fn update_ack_level(&self, cluster: &str, message_id: i64) -> Result<(), WarpflowError> {
        let mut queue = self.queue.write();
        let level = queue.ack_levels.entry(cluster.to_string()).or_insert(0);
        // Ack levels never regress.
        if message_id > *level {
            *level = message_id;
        }
        Ok(())
    }

    async fn get_ack_levels(&self) -> Result<HashMap<String, i64>, WarpflowError> {
        Ok(self.queue.read().ack_levels.clone())
    }

    async fn publish_to_dlq(
        &self,
        source_cluster: &str,
        message: ReplicationQueueMessage,
    ) -> Result<(), WarpflowError> {
        self.queue
            .write()
            .dlq
            .entry(source_cluster.to_string())
            .or_default()
            .insert(message.message_id, message);
        Ok(())
    }

    async fn get_dlq_messages(
        &self,
        source_cluster: &str,
        last_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError> {
        let queue = self.queue.read();
        let Some(dlq) = queue.dlq.get(source_cluster) else {
            return Ok(Vec::new());
        };
        Ok(dlq
            .range((last_message_id + 1)..)
            .take(max_count)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn get_dlq_size(&self, source_cluster: &str) -> Result<usize, WarpflowError> {
        Ok(self
            .queue
            .read()
            .dlq
            .get(source_cluster)
            .map(|dlq| dlq.len())
            .unwrap_or(0))
    }

    async fn delete_dlq_message(
        &self,
        source_cluster: &str,
        message_id: i64,
    ) -> Result<(), WarpflowError> {
        if let Some(dlq) = self.queue.write().dlq.get_mut(source_cluster) {
            dlq.remove(&message_id);
        }
        Ok(())
    }

    async fn range_delete_dlq_messages(
        &self,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<(), WarpflowError> {
        if let Some(dlq) = self.queue.write().dlq.get_mut(source_cluster) {
            dlq.retain(|id, _| *id <= exclusive_begin || *id > inclusive_end);
        }
        Ok(())
    }
}
