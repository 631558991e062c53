// src/core/types.rs

//! Shared identifiers, enums, and the workflow state table used across the engine.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::core::errors::WarpflowError;

/// Fixed partition unit identifier. Shard ownership is arbitrated by the
/// membership ring and evidenced by a monotonically increasing `RangeID`.
pub type ShardId = u32;

/// Shard-scoped, monotonically increasing task identifier.
pub type TaskId = i64;

/// Per-run history event identifier.
pub type EventId = i64;

/// Failover / entry version used to arbitrate between replicated updates.
pub type Version = i64;

/// The version carried by entities that have never been replicated.
pub const EMPTY_VERSION: Version = -24;

/// Sentinel for "no event".
pub const EMPTY_EVENT_ID: EventId = -23;

/// The event ID of the first event in a new history branch.
pub const FIRST_EVENT_ID: EventId = 1;

/// The lifecycle state of a workflow execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum WorkflowState {
    Created,
    Running,
    Completed,
    /// A non-current run that exists alongside (or without) a current run for
    /// the same `(DomainID, WorkflowID)`. Zombie writes never touch the
    /// current-execution pointer.
    Zombie,
    /// Marked by the corruption scanner; bypasses the state table until purged.
    Corrupted,
}

/// How a completed execution closed. `None` for live executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default)]
pub enum CloseStatus {
    #[default]
    None,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

/// Validates the `(State, CloseStatus)` table: a close status is present iff
/// the execution has completed. `Corrupted` records are exempt so that the
/// scanner can quarantine them regardless of what it found.
pub fn validate_state_close_status(
    state: WorkflowState,
    close_status: CloseStatus,
) -> Result<(), WarpflowError> {
    match state {
        WorkflowState::Created | WorkflowState::Running | WorkflowState::Zombie => {
            if close_status != CloseStatus::None {
                return Err(WarpflowError::Internal(format!(
                    "Invalid workflow state {state} with close status {close_status}"
                )));
            }
        }
        WorkflowState::Completed => {
            if close_status == CloseStatus::None {
                return Err(WarpflowError::Internal(
                    "Completed workflow execution is missing a close status".to_string(),
                ));
            }
        }
        WorkflowState::Corrupted => {}
    }
    Ok(())
}

/// The identity of a single workflow run. Tasks for the same key execute in
/// submission order; different keys proceed concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowKey {
    pub fn new(
        domain_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// The kind of side-effect a transfer task dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TransferTaskType {
    DecisionTask,
    ActivityTask,
    CloseExecution,
    CancelExecution,
    SignalExecution,
    StartChildExecution,
}

/// The kind of timeout or timer a timer task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TimerTaskType {
    DecisionTimeout,
    ActivityTimeout,
    UserTimer,
    WorkflowTimeout,
    DeleteHistoryEvent,
}

/// Creation modes for `CreateWorkflowExecution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateWorkflowMode {
    /// Fails with `AlreadyStarted` if any current execution exists.
    BrandNew,
    /// Succeeds iff the current execution matches the supplied previous run
    /// and is closed.
    WorkflowIdReuse,
    /// Creates a run without touching or requiring the current pointer.
    Zombie,
}

/// Update / conflict-resolve modes. `BypassCurrent` is only legal for
/// zombie and reset paths and must never move the current pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateWorkflowMode {
    UpdateCurrent,
    BypassCurrent,
}

/// Registration status of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
pub enum DomainStatus {
    #[default]
    Registered,
    Deprecated,
    Deleted,
}

/// Whether an archival destination is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
pub enum ArchivalStatus {
    #[default]
    Disabled,
    Enabled,
}
