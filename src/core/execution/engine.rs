// src/core/execution/engine.rs

//! The per-shard execution engine: commits mutable-state mutations through
//! the persistence layer under the shard's RangeID lease, assigning task IDs
//! to every side-effect task the mutation produced.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::errors::WarpflowError;
use crate::core::persistence::store::{
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest, ExecutionStore,
    UpdateWorkflowExecutionRequest, WorkflowMutation, WorkflowSnapshot,
};
use crate::core::persistence::types::{TimerTask, TransferTask, WorkflowExecutionInfo};
use crate::core::shard::ShardContext;
use crate::core::types::{
    CloseStatus, CreateWorkflowMode, TimerTaskType, TransferTaskType, UpdateWorkflowMode, Version,
    WorkflowState,
};

use super::mutable_state::MutableState;

/// How many times an update is retried after a `ConditionFailed` before the
/// error is surfaced.
const CONDITION_RETRY_COUNT: usize = 5;

/// Everything needed to start a run on this shard.
#[derive(Debug, Clone)]
pub struct StartWorkflowRequest {
    pub domain_id: String,
    pub workflow_id: String,
    /// Generated when absent.
    pub run_id: Option<String>,
    pub task_list: String,
    pub workflow_type_name: String,
    pub workflow_timeout_seconds: i32,
    pub decision_timeout_seconds: i32,
    pub request_id: String,
    pub mode: CreateWorkflowMode,
    pub previous_run_id: Option<String>,
    pub previous_last_write_version: Option<i64>,
    /// The domain's failover version at start time.
    pub version: Version,
}

/// The engine for one shard. Handles live on the shard context; the engine
/// holds no state of its own beyond the store handle.
pub struct ExecutionEngine {
    shard: Arc<ShardContext>,
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionEngine {
    pub fn new(shard: Arc<ShardContext>, store: Arc<dyn ExecutionStore>) -> Self {
        Self { shard, store }
    }

    pub fn shard(&self) -> &Arc<ShardContext> {
        &self.shard
    }

    /// Creates a workflow execution. For non-zombie modes this also seeds the
    /// initial decision transfer task and the workflow-timeout timer task.
    pub async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<String, WarpflowError> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut info = WorkflowExecutionInfo::new(
            request.domain_id.clone(),
            request.workflow_id.clone(),
            run_id.clone(),
        );
        info.task_list = request.task_list.clone();
        info.workflow_type_name = request.workflow_type_name.clone();
        info.workflow_timeout_seconds = request.workflow_timeout_seconds;
        info.decision_timeout_seconds = request.decision_timeout_seconds;
        info.create_request_id = request.request_id.clone();
        info.state = if request.mode == CreateWorkflowMode::Zombie {
            WorkflowState::Zombie
        } else {
            WorkflowState::Running
        };
        info.close_status = CloseStatus::None;

        let mut mutable_state = MutableState::new_execution(info);
        mutable_state.add_history_event(
            "WorkflowExecutionStarted",
            serde_json::json!({
                "workflowType": request.workflow_type_name,
                "taskList": request.task_list,
            }),
            request.version,
        )?;

        if request.mode != CreateWorkflowMode::Zombie {
            let decision_schedule_id = mutable_state
                .add_history_event("DecisionTaskScheduled", serde_json::json!({}), request.version)?
                .event_id;
            mutable_state.info_mut().decision.schedule_id = decision_schedule_id;
            mutable_state.info_mut().decision.version = request.version;

            mutable_state.add_transfer_task(TransferTask {
                task_id: 0,
                domain_id: request.domain_id.clone(),
                workflow_id: request.workflow_id.clone(),
                run_id: run_id.clone(),
                task_type: TransferTaskType::DecisionTask,
                target_domain_id: None,
                target_workflow_id: None,
                target_run_id: None,
                task_list: request.task_list.clone(),
                schedule_id: decision_schedule_id,
                version: request.version,
                visibility_timestamp: Utc::now(),
            });
            if request.workflow_timeout_seconds > 0 {
                mutable_state.add_timer_task(TimerTask {
                    visibility_timestamp: Utc::now()
                        + chrono::Duration::seconds(request.workflow_timeout_seconds as i64),
                    task_id: 0,
                    domain_id: request.domain_id.clone(),
                    workflow_id: request.workflow_id.clone(),
                    run_id: run_id.clone(),
                    task_type: TimerTaskType::WorkflowTimeout,
                    event_id: 0,
                    attempt: 0,
                    version: request.version,
                });
            }
        }

        let mut snapshot = mutable_state.close_as_snapshot()?;
        self.assign_snapshot_task_ids(&mut snapshot).await?;

        let create_request = CreateWorkflowExecutionRequest {
            shard_id: self.shard.shard_id(),
            range_id: self.shard.range_id().await,
            mode: request.mode,
            previous_run_id: request.previous_run_id,
            previous_last_write_version: request.previous_last_write_version,
            new_workflow: snapshot,
        };
        match self.store.create_workflow_execution(create_request).await {
            Ok(()) => Ok(run_id),
            Err(e) => {
                self.shard.handle_error(&e);
                Err(e)
            }
        }
    }

    pub async fn load_mutable_state(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<MutableState, WarpflowError> {
        let record = self
            .store
            .get_workflow_execution(self.shard.shard_id(), domain_id, workflow_id, run_id)
            .await?;
        MutableState::load(record)
    }

    pub async fn get_current_run_id(
        &self,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<String, WarpflowError> {
        Ok(self
            .store
            .get_current_execution(self.shard.shard_id(), domain_id, workflow_id)
            .await?
            .run_id)
    }

    /// Commits the accumulated changes of a loaded working copy.
    pub async fn commit_update(
        &self,
        mutable_state: &mut MutableState,
        mode: UpdateWorkflowMode,
    ) -> Result<(), WarpflowError> {
        let mut mutation = mutable_state.close_as_mutation()?;
        self.assign_mutation_task_ids(&mut mutation).await?;
        let request = UpdateWorkflowExecutionRequest {
            shard_id: self.shard.shard_id(),
            range_id: self.shard.range_id().await,
            mode,
            mutation,
            new_workflow: None,
        };
        match self.store.update_workflow_execution(request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shard.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Loads, mutates, and commits a run, reloading and retrying when the
    /// condition check fails under a concurrent writer.
    pub async fn update_workflow<F>(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
        mode: UpdateWorkflowMode,
        mutator: F,
    ) -> Result<(), WarpflowError>
    where
        F: Fn(&mut MutableState) -> Result<(), WarpflowError>,
    {
        let mut last_error = None;
        for _ in 0..CONDITION_RETRY_COUNT {
            let mut mutable_state = self.load_mutable_state(domain_id, workflow_id, run_id).await?;
            mutator(&mut mutable_state)?;
            match self.commit_update(&mut mutable_state, mode).await {
                Ok(()) => return Ok(()),
                Err(e @ WarpflowError::ConditionFailed(_)) => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| WarpflowError::Internal("Update retry loop exhausted".to_string())))
    }

    /// Closes the current run as continued-as-new and atomically seeds the
    /// successor, moving the current pointer to the new run.
    pub async fn continue_as_new(
        &self,
        mutable_state: &mut MutableState,
        version: Version,
    ) -> Result<String, WarpflowError> {
        let info = mutable_state.info().clone();
        mutable_state.add_history_event(
            "WorkflowExecutionContinuedAsNew",
            serde_json::json!({}),
            version,
        )?;
        mutable_state.set_state(WorkflowState::Completed, CloseStatus::ContinuedAsNew)?;
        let mut mutation = mutable_state.close_as_mutation()?;

        let new_run_id = Uuid::new_v4().to_string();
        let mut new_info =
            WorkflowExecutionInfo::new(info.domain_id.clone(), info.workflow_id.clone(), new_run_id.clone());
        new_info.task_list = info.task_list.clone();
        new_info.workflow_type_name = info.workflow_type_name.clone();
        new_info.workflow_timeout_seconds = info.workflow_timeout_seconds;
        new_info.decision_timeout_seconds = info.decision_timeout_seconds;
        new_info.create_request_id = Uuid::new_v4().to_string();
        new_info.state = WorkflowState::Running;

        let mut new_state = MutableState::new_execution(new_info);
        new_state.add_history_event("WorkflowExecutionStarted", serde_json::json!({}), version)?;
        let decision_schedule_id = new_state
            .add_history_event("DecisionTaskScheduled", serde_json::json!({}), version)?
            .event_id;
        new_state.info_mut().decision.schedule_id = decision_schedule_id;
        new_state.add_transfer_task(TransferTask {
            task_id: 0,
            domain_id: info.domain_id.clone(),
            workflow_id: info.workflow_id.clone(),
            run_id: new_run_id.clone(),
            task_type: TransferTaskType::DecisionTask,
            target_domain_id: None,
            target_workflow_id: None,
            target_run_id: None,
            task_list: info.task_list.clone(),
            schedule_id: decision_schedule_id,
            version,
            visibility_timestamp: Utc::now(),
        });
        let mut new_snapshot = new_state.close_as_snapshot()?;

        self.assign_mutation_task_ids(&mut mutation).await?;
        self.assign_snapshot_task_ids(&mut new_snapshot).await?;

        let request = UpdateWorkflowExecutionRequest {
            shard_id: self.shard.shard_id(),
            range_id: self.shard.range_id().await,
            mode: UpdateWorkflowMode::UpdateCurrent,
            mutation,
            new_workflow: Some(new_snapshot),
        };
        match self.store.update_workflow_execution(request).await {
            Ok(()) => Ok(new_run_id),
            Err(e) => {
                self.shard.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Installs a fresh mutable-state snapshot for the reset run, optionally
    /// mutating a concurrent run and/or seeding a continued-as-new run, in
    /// one atomic commit.
    pub async fn conflict_resolve(
        &self,
        reset_state: &mut MutableState,
        current_state: Option<&mut MutableState>,
        new_state: Option<&mut MutableState>,
        mode: UpdateWorkflowMode,
    ) -> Result<(), WarpflowError> {
        let mut reset_snapshot = reset_state.close_as_snapshot()?;
        self.assign_snapshot_task_ids(&mut reset_snapshot).await?;

        let current_mutation = match current_state {
            Some(state) => {
                let mut mutation = state.close_as_mutation()?;
                self.assign_mutation_task_ids(&mut mutation).await?;
                Some(mutation)
            }
            None => None,
        };
        let new_snapshot = match new_state {
            Some(state) => {
                let mut snapshot = state.close_as_snapshot()?;
                self.assign_snapshot_task_ids(&mut snapshot).await?;
                Some(snapshot)
            }
            None => None,
        };

        let request = ConflictResolveWorkflowExecutionRequest {
            shard_id: self.shard.shard_id(),
            range_id: self.shard.range_id().await,
            mode,
            reset_workflow: reset_snapshot,
            current_mutation,
            new_workflow: new_snapshot,
        };
        match self.store.conflict_resolve_workflow_execution(request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shard.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Whether a replicated write at `version` should be applied: stale
    /// versions are ignored rather than failed.
    pub fn should_apply_replicated_write(
        &self,
        mutable_state: &MutableState,
        version: Version,
    ) -> Result<bool, WarpflowError> {
        Ok(version >= mutable_state.last_write_version()?)
    }

    /// Two-step delete: current pointer first, then the execution record.
    pub async fn delete_workflow_execution(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), WarpflowError> {
        self.store
            .delete_current_workflow_execution(self.shard.shard_id(), domain_id, workflow_id, run_id)
            .await?;
        self.store
            .delete_workflow_execution(self.shard.shard_id(), domain_id, workflow_id, run_id)
            .await
    }

    async fn assign_snapshot_task_ids(
        &self,
        snapshot: &mut WorkflowSnapshot,
    ) -> Result<(), WarpflowError> {
        let count = snapshot.transfer_tasks.len()
            + snapshot.timer_tasks.len()
            + snapshot.replication_tasks.len();
        if count == 0 {
            return Ok(());
        }
        let mut ids = self.shard.allocate_task_ids(count).await?.into_iter();
        for task in &mut snapshot.transfer_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        for task in &mut snapshot.timer_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        for task in &mut snapshot.replication_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        Ok(())
    }

    async fn assign_mutation_task_ids(
        &self,
        mutation: &mut WorkflowMutation,
    ) -> Result<(), WarpflowError> {
        let count = mutation.transfer_tasks.len()
            + mutation.timer_tasks.len()
            + mutation.replication_tasks.len();
        if count == 0 {
            return Ok(());
        }
        let mut ids = self.shard.allocate_task_ids(count).await?.into_iter();
        for task in &mut mutation.transfer_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        for task in &mut mutation.timer_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        for task in &mut mutation.replication_tasks {
            task.task_id = ids.next().expect("allocated above");
        }
        Ok(())
    }
}
