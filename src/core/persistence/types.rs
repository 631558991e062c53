// src/core/persistence/types.rs

//! Durable record shapes shared by the engine and the store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::execution::version_histories::VersionHistories;
use crate::core::types::{
    ArchivalStatus, CloseStatus, DomainStatus, EventId, ShardId, TaskId, TimerTaskType,
    TransferTaskType, Version, WorkflowState,
};

/// Orders tasks across both task-ID-keyed and timestamp-keyed queues.
/// Transfer and replication tasks leave `visibility_timestamp` unset; timer
/// tasks order by `(VisibilityTimestamp, TaskID)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub visibility_timestamp: Option<DateTime<Utc>>,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn immediate(task_id: TaskId) -> Self {
        Self {
            visibility_timestamp: None,
            task_id,
        }
    }

    pub fn scheduled(visibility_timestamp: DateTime<Utc>, task_id: TaskId) -> Self {
        Self {
            visibility_timestamp: Some(visibility_timestamp),
            task_id,
        }
    }
}

/// Which domains a processing queue covers: the listed set, or everything
/// except the listed set when `reverse_match` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DomainFilter {
    pub domain_ids: BTreeSet<String>,
    pub reverse_match: bool,
}

impl DomainFilter {
    /// Matches every domain.
    pub fn all() -> Self {
        Self {
            domain_ids: BTreeSet::new(),
            reverse_match: true,
        }
    }

    pub fn include(domain_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            domain_ids: domain_ids.into_iter().collect(),
            reverse_match: false,
        }
    }

    pub fn matches(&self, domain_id: &str) -> bool {
        self.domain_ids.contains(domain_id) != self.reverse_match
    }

    /// Removes `domain_ids` from this filter's coverage.
    pub fn exclude(&self, domain_ids: &BTreeSet<String>) -> Self {
        if self.reverse_match {
            Self {
                domain_ids: self.domain_ids.union(domain_ids).cloned().collect(),
                reverse_match: true,
            }
        } else {
            Self {
                domain_ids: self.domain_ids.difference(domain_ids).cloned().collect(),
                reverse_match: false,
            }
        }
    }
}

/// The persisted window of one processing queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingQueueState {
    /// Split depth; level 0 is the root queue.
    pub level: usize,
    pub ack_level: TaskKey,
    pub read_level: TaskKey,
    pub max_level: TaskKey,
    pub domain_filter: DomainFilter,
}

/// The durable shard record. `range_id` strictly increases; any write
/// carrying an older value is rejected as shard-ownership-lost. Ack levels
/// never regress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: ShardId,
    pub owner: String,
    pub range_id: i64,
    pub stolen_since_renew: i32,
    pub updated_at: DateTime<Utc>,
    pub replication_ack_level: TaskId,
    pub transfer_ack_level: TaskId,
    pub timer_ack_level: DateTime<Utc>,
    pub cluster_transfer_ack_level: HashMap<String, TaskId>,
    pub cluster_timer_ack_level: HashMap<String, DateTime<Utc>>,
    pub transfer_processing_queue_states: HashMap<String, Vec<ProcessingQueueState>>,
    pub timer_processing_queue_states: HashMap<String, Vec<ProcessingQueueState>>,
    pub cluster_replication_level: HashMap<String, TaskId>,
    pub replication_dlq_ack_level: HashMap<String, TaskId>,
    pub domain_notification_version: i64,
}

impl ShardInfo {
    pub fn new(shard_id: ShardId, owner: impl Into<String>) -> Self {
        Self {
            shard_id,
            owner: owner.into(),
            range_id: 0,
            stolen_since_renew: 0,
            updated_at: Utc::now(),
            replication_ack_level: 0,
            transfer_ack_level: 0,
            timer_ack_level: DateTime::<Utc>::UNIX_EPOCH,
            cluster_transfer_ack_level: HashMap::new(),
            cluster_timer_ack_level: HashMap::new(),
            transfer_processing_queue_states: HashMap::new(),
            timer_processing_queue_states: HashMap::new(),
            cluster_replication_level: HashMap::new(),
            replication_dlq_ack_level: HashMap::new(),
            domain_notification_version: 0,
        }
    }
}

/// A minimal history event. The engine moves events between regions and
/// buffers; it never interprets their business semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: EventId,
    pub version: Version,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: serde_json::Value,
}

/// Decision (workflow task) bookkeeping inside the execution info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DecisionInfo {
    pub version: Version,
    pub schedule_id: EventId,
    pub started_id: EventId,
    pub request_id: String,
    pub timeout_seconds: i32,
    pub attempt: i64,
    pub scheduled_timestamp: Option<DateTime<Utc>>,
    pub started_timestamp: Option<DateTime<Utc>>,
}

/// Server-side retry policy attached to an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionRetryPolicy {
    pub initial_interval_seconds: i32,
    pub backoff_coefficient: f64,
    pub maximum_interval_seconds: i32,
    pub maximum_attempts: i32,
    pub expiration_time: Option<DateTime<Utc>>,
    pub non_retriable_errors: Vec<String>,
}

/// A point an operator can reset the workflow back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetPoint {
    pub binary_checksum: String,
    pub run_id: String,
    pub first_decision_completed_id: EventId,
    pub created_time: DateTime<Utc>,
    pub resettable: bool,
}

/// The mutable per-execution core record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionInfo {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub parent_domain_id: Option<String>,
    pub parent_workflow_id: Option<String>,
    pub parent_run_id: Option<String>,
    pub initiated_id: EventId,
    pub task_list: String,
    pub workflow_type_name: String,
    pub workflow_timeout_seconds: i32,
    pub decision_timeout_seconds: i32,
    pub state: WorkflowState,
    pub close_status: CloseStatus,
    pub last_first_event_id: EventId,
    pub next_event_id: EventId,
    pub last_processed_event: EventId,
    pub start_timestamp: DateTime<Utc>,
    pub last_updated_timestamp: DateTime<Utc>,
    pub create_request_id: String,
    pub decision: DecisionInfo,
    pub cancel_requested: bool,
    pub cancel_request_id: Option<String>,
    pub attempt: i32,
    pub retry_policy: Option<ExecutionRetryPolicy>,
    pub search_attributes: HashMap<String, serde_json::Value>,
    pub memo: HashMap<String, serde_json::Value>,
    pub auto_reset_points: Vec<ResetPoint>,
}

impl WorkflowExecutionInfo {
    pub fn new(
        domain_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            parent_domain_id: None,
            parent_workflow_id: None,
            parent_run_id: None,
            initiated_id: crate::core::types::EMPTY_EVENT_ID,
            task_list: String::new(),
            workflow_type_name: String::new(),
            workflow_timeout_seconds: 0,
            decision_timeout_seconds: 0,
            state: WorkflowState::Created,
            close_status: CloseStatus::None,
            last_first_event_id: crate::core::types::FIRST_EVENT_ID,
            next_event_id: crate::core::types::FIRST_EVENT_ID,
            last_processed_event: crate::core::types::EMPTY_EVENT_ID,
            start_timestamp: now,
            last_updated_timestamp: now,
            create_request_id: String::new(),
            decision: DecisionInfo::default(),
            cancel_requested: false,
            cancel_request_id: None,
            attempt: 0,
            retry_policy: None,
            search_attributes: HashMap::new(),
            memo: HashMap::new(),
            auto_reset_points: Vec::new(),
        }
    }
}

/// In-flight activity bookkeeping, keyed by schedule event ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub version: Version,
    pub schedule_id: EventId,
    pub scheduled_time: DateTime<Utc>,
    pub started_id: EventId,
    pub started_time: Option<DateTime<Utc>>,
    pub activity_id: String,
    pub request_id: String,
    pub schedule_to_start_timeout_seconds: i32,
    pub schedule_to_close_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
    pub cancel_requested: bool,
    pub attempt: i32,
    pub last_heartbeat_details: Option<serde_json::Value>,
}

/// A user timer, keyed by its user-facing timer ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerInfo {
    pub version: Version,
    pub timer_id: String,
    pub started_id: EventId,
    pub expiry_time: DateTime<Utc>,
    pub task_status: i64,
}

/// A child workflow initiated by this run, keyed by initiated event ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildExecutionInfo {
    pub version: Version,
    pub initiated_id: EventId,
    pub started_id: EventId,
    pub create_request_id: String,
    pub domain_name: String,
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub workflow_type_name: String,
}

/// An outstanding cancellation request to an external workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelInfo {
    pub version: Version,
    pub initiated_id: EventId,
    pub cancel_request_id: String,
}

/// An outstanding signal to an external workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub version: Version,
    pub initiated_id: EventId,
    pub signal_request_id: String,
    pub signal_name: String,
    pub input: Option<serde_json::Value>,
    pub control: Option<Vec<u8>>,
}

/// The full durable mutable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMutableStateRecord {
    pub execution_info: WorkflowExecutionInfo,
    pub activity_infos: HashMap<EventId, ActivityInfo>,
    pub timer_infos: HashMap<String, TimerInfo>,
    pub child_execution_infos: HashMap<EventId, ChildExecutionInfo>,
    pub request_cancel_infos: HashMap<EventId, RequestCancelInfo>,
    pub signal_infos: HashMap<EventId, SignalInfo>,
    pub signal_requested_ids: HashSet<String>,
    pub buffered_events: Vec<HistoryEvent>,
    pub version_histories: VersionHistories,
    pub checksum: u32,
}

/// The current-execution pointer for a `(DomainID, WorkflowID)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentExecution {
    pub run_id: String,
    pub start_request_id: String,
    pub state: WorkflowState,
    pub close_status: CloseStatus,
    pub last_write_version: Version,
}

/// A transfer task: an immediate side-effect ordered by shard-scoped task ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub task_id: TaskId,
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_type: TransferTaskType,
    pub target_domain_id: Option<String>,
    pub target_workflow_id: Option<String>,
    pub target_run_id: Option<String>,
    pub task_list: String,
    pub schedule_id: EventId,
    pub version: Version,
    pub visibility_timestamp: DateTime<Utc>,
}

/// A timer task, ordered by `(VisibilityTimestamp, TaskID)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTask {
    pub visibility_timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_type: TimerTaskType,
    pub event_id: EventId,
    pub attempt: i64,
    pub version: Version,
}

/// Payload of a history/activity replication task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationTaskAttributes {
    History {
        domain_id: String,
        workflow_id: String,
        run_id: String,
        first_event_id: EventId,
        next_event_id: EventId,
        version: Version,
        branch_token: Vec<u8>,
        new_run_branch_token: Option<Vec<u8>>,
    },
    SyncActivity {
        domain_id: String,
        workflow_id: String,
        run_id: String,
        version: Version,
        scheduled_id: EventId,
    },
    FailoverMarker {
        domain_id: String,
        version: Version,
    },
}

impl ReplicationTaskAttributes {
    pub fn domain_id(&self) -> &str {
        match self {
            ReplicationTaskAttributes::History { domain_id, .. }
            | ReplicationTaskAttributes::SyncActivity { domain_id, .. }
            | ReplicationTaskAttributes::FailoverMarker { domain_id, .. } => domain_id,
        }
    }
}

/// A replication task on a shard's replication stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub task_id: TaskId,
    pub creation_time: DateTime<Utc>,
    pub attributes: ReplicationTaskAttributes,
}

// --- Domain records ---

/// Identity and operator metadata of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub id: String,
    pub name: String,
    pub status: DomainStatus,
    pub description: String,
    pub owner_email: String,
    pub data: HashMap<String, String>,
}

/// A deployment marked bad; workflows started by it are candidates for reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadBinaryInfo {
    pub reason: String,
    pub operator: String,
    pub created_time_nano: i64,
}

/// Retention and archival configuration of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfigRecord {
    pub retention_days: i32,
    pub emit_metric: bool,
    pub history_archival_status: ArchivalStatus,
    pub history_archival_uri: String,
    pub visibility_archival_status: ArchivalStatus,
    pub visibility_archival_uri: String,
    pub bad_binaries: HashMap<String, BadBinaryInfo>,
}

impl Default for DomainConfigRecord {
    fn default() -> Self {
        Self {
            retention_days: 1,
            emit_metric: true,
            history_archival_status: ArchivalStatus::Disabled,
            history_archival_uri: String::new(),
            visibility_archival_status: ArchivalStatus::Disabled,
            visibility_archival_uri: String::new(),
            bad_binaries: HashMap::new(),
        }
    }
}

/// Which clusters replicate a domain and which one is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DomainReplicationConfig {
    pub active_cluster_name: String,
    pub clusters: Vec<String>,
}

/// The full durable domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub info: DomainInfo,
    pub config: DomainConfigRecord,
    pub replication_config: DomainReplicationConfig,
    pub is_global: bool,
    pub config_version: i64,
    pub failover_version: Version,
    pub previous_failover_version: Version,
    pub failover_end_time: Option<DateTime<Utc>>,
    pub last_updated_time: DateTime<Utc>,
    pub notification_version: i64,
}

/// The kind of domain change a replication message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainOperation {
    Create,
    Update,
}

/// The payload of one domain-replication queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTaskAttributes {
    pub operation: DomainOperation,
    pub id: String,
    pub info: DomainInfo,
    pub config: DomainConfigRecord,
    pub replication_config: DomainReplicationConfig,
    pub config_version: i64,
    pub failover_version: Version,
    pub previous_failover_version: Version,
    pub failover_end_time: Option<DateTime<Utc>>,
}

/// One message on the durable domain-replication queue. Message IDs are
/// monotonic and gap-free per publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationQueueMessage {
    pub message_id: i64,
    pub payload: DomainTaskAttributes,
}
