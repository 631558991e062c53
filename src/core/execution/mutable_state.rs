// src/core/execution/mutable_state.rs

//! The in-memory working copy of one run's durable state. Mutations
//! accumulate against the loaded record and are drained into a
//! [`WorkflowMutation`] or [`WorkflowSnapshot`] for an atomic commit.

use chrono::Utc;
use crc::{CRC_32_ISCSI, Crc};
use std::collections::HashSet;

use crate::core::errors::WarpflowError;
use crate::core::persistence::store::{WorkflowMutation, WorkflowSnapshot};
use crate::core::persistence::types::{
    ActivityInfo, ChildExecutionInfo, HistoryEvent, ReplicationTask, RequestCancelInfo,
    SignalInfo, TimerInfo, TimerTask, TransferTask, WorkflowExecutionInfo,
    WorkflowMutableStateRecord,
};
use crate::core::types::{
    CloseStatus, EventId, Version, WorkflowState, validate_state_close_status,
};

use super::version_histories::{VersionHistories, VersionHistory, VersionHistoryItem};

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Computes the content checksum persisted with the record. Covers the
/// execution info and the identity of every associated-map entry, so a
/// partially written record fails verification on load.
pub fn compute_checksum(record: &WorkflowMutableStateRecord) -> u32 {
    let mut digest = CHECKSUM.digest();
    if let Ok(bytes) = serde_json::to_vec(&record.execution_info) {
        digest.update(&bytes);
    }
    let mut activity_ids: Vec<EventId> = record.activity_infos.keys().copied().collect();
    activity_ids.sort_unstable();
    for id in activity_ids {
        digest.update(&id.to_be_bytes());
    }
    let mut timer_ids: Vec<&String> = record.timer_infos.keys().collect();
    timer_ids.sort();
    for id in timer_ids {
        digest.update(id.as_bytes());
    }
    let mut child_ids: Vec<EventId> = record.child_execution_infos.keys().copied().collect();
    child_ids.sort_unstable();
    for id in child_ids {
        digest.update(&id.to_be_bytes());
    }
    let mut cancel_ids: Vec<EventId> = record.request_cancel_infos.keys().copied().collect();
    cancel_ids.sort_unstable();
    for id in cancel_ids {
        digest.update(&id.to_be_bytes());
    }
    let mut signal_ids: Vec<EventId> = record.signal_infos.keys().copied().collect();
    signal_ids.sort_unstable();
    for id in signal_ids {
        digest.update(&id.to_be_bytes());
    }
    digest.finalize()
}

/// Verifies a loaded record against its stored checksum.
pub fn verify_checksum(record: &WorkflowMutableStateRecord) -> Result<(), WarpflowError> {
    let expected = compute_checksum(record);
    if record.checksum != 0 && record.checksum != expected {
        return Err(WarpflowError::Internal(format!(
            "Mutable state checksum mismatch for run {}: stored {} computed {}",
            record.execution_info.run_id, record.checksum, expected
        )));
    }
    Ok(())
}

/// The working copy of one run. Loaded from a record, mutated through the
/// methods below, then drained via [`MutableState::close_as_mutation`] or
/// [`MutableState::close_as_snapshot`].
#[derive(Debug, Clone)]
pub struct MutableState {
    record: WorkflowMutableStateRecord,
    /// The `NextEventID` observed at load time; commits CAS against it.
    condition: EventId,

    dirty_activities: HashSet<EventId>,
    deleted_activities: HashSet<EventId>,
    dirty_timers: HashSet<String>,
    deleted_timers: HashSet<String>,
    dirty_children: HashSet<EventId>,
    deleted_children: HashSet<EventId>,
    dirty_cancels: HashSet<EventId>,
    deleted_cancels: HashSet<EventId>,
    dirty_signals: HashSet<EventId>,
    deleted_signals: HashSet<EventId>,
    added_signal_requested: HashSet<String>,
    removed_signal_requested: HashSet<String>,
    new_buffered_events: Vec<HistoryEvent>,
    clear_buffered_events: bool,

    transfer_tasks: Vec<TransferTask>,
    timer_tasks: Vec<TimerTask>,
    replication_tasks: Vec<ReplicationTask>,
}

impl MutableState {
    /// Starts the working copy of a brand-new run. The version history
    /// starts empty and grows with the first appended event.
    pub fn new_execution(info: WorkflowExecutionInfo) -> Self {
        let histories = VersionHistories::new(VersionHistory::new(Vec::new(), Vec::new()));
        let record = WorkflowMutableStateRecord {
            execution_info: info,
            activity_infos: Default::default(),
            timer_infos: Default::default(),
            child_execution_infos: Default::default(),
            request_cancel_infos: Default::default(),
            signal_infos: Default::default(),
            signal_requested_ids: Default::default(),
            buffered_events: Vec::new(),
            version_histories: histories,
            checksum: 0,
        };
        Self::load_unverified(record)
    }

    /// Loads a working copy, verifying the stored checksum.
    pub fn load(record: WorkflowMutableStateRecord) -> Result<Self, WarpflowError> {
        verify_checksum(&record)?;
        Ok(Self::load_unverified(record))
    }

    fn load_unverified(record: WorkflowMutableStateRecord) -> Self {
        let condition = record.execution_info.next_event_id;
        Self {
            record,
            condition,
            dirty_activities: Default::default(),
            deleted_activities: Default::default(),
            dirty_timers: Default::default(),
            deleted_timers: Default::default(),
            dirty_children: Default::default(),
            deleted_children: Default::default(),
            dirty_cancels: Default::default(),
            deleted_cancels: Default::default(),
            dirty_signals: Default::default(),
            deleted_signals: Default::default(),
            added_signal_requested: Default::default(),
            removed_signal_requested: Default::default(),
            new_buffered_events: Vec::new(),
            clear_buffered_events: false,
            transfer_tasks: Vec::new(),
            timer_tasks: Vec::new(),
            replication_tasks: Vec::new(),
        }
    }

    pub fn info(&self) -> &WorkflowExecutionInfo {
        &self.record.execution_info
    }

    pub fn info_mut(&mut self) -> &mut WorkflowExecutionInfo {
        &mut self.record.execution_info
    }

    pub fn version_histories(&self) -> &VersionHistories {
        &self.record.version_histories
    }

    pub fn condition(&self) -> EventId {
        self.condition
    }

    pub fn is_workflow_running(&self) -> bool {
        matches!(
            self.record.execution_info.state,
            WorkflowState::Created | WorkflowState::Running
        )
    }

    pub fn has_pending_decision(&self) -> bool {
        self.record.execution_info.decision.schedule_id != crate::core::types::EMPTY_EVENT_ID
    }

    pub fn buffered_events(&self) -> &[HistoryEvent] {
        &self.record.buffered_events
    }

    /// The version the last history event was written at.
    pub fn last_write_version(&self) -> Result<Version, WarpflowError> {
        Ok(self.record.version_histories.current()?.last_item()?.version)
    }

    /// Transitions the lifecycle state, rejecting illegal combinations and
    /// any move from a terminal status back to a live one.
    pub fn set_state(
        &mut self,
        state: WorkflowState,
        close_status: CloseStatus,
    ) -> Result<(), WarpflowError> {
        validate_state_close_status(state, close_status)
            .map_err(|e| WarpflowError::BadRequest(e.to_string()))?;
        let current = self.record.execution_info.state;
        if current == WorkflowState::Completed && state != WorkflowState::Completed {
            return Err(WarpflowError::BadRequest(format!(
                "Cannot transition completed workflow {} back to {state}",
                self.record.execution_info.workflow_id
            )));
        }
        self.record.execution_info.state = state;
        self.record.execution_info.close_status = close_status;
        Ok(())
    }

    /// Appends one history event at `version`, advancing `NextEventID` and
    /// the current version history.
    pub fn add_history_event(
        &mut self,
        event_type: impl Into<String>,
        attributes: serde_json::Value,
        version: Version,
    ) -> Result<HistoryEvent, WarpflowError> {
        let event_id = self.record.execution_info.next_event_id;
        let event = HistoryEvent {
            event_id,
            version,
            event_type: event_type.into(),
            timestamp: Utc::now(),
            attributes,
        };
        self.record
            .version_histories
            .current_mut()?
            .add_or_update_item(VersionHistoryItem::new(event_id, version))?;
        self.record.execution_info.next_event_id += 1;
        self.record.execution_info.last_updated_timestamp = Utc::now();
        Ok(event)
    }

    /// Buffers an inbound event while a decision is outstanding. Buffered
    /// events carry no event ID until flushed.
    pub fn buffer_event(&mut self, event: HistoryEvent) {
        self.new_buffered_events.push(event);
    }

    /// Flushes buffered events into history, assigning event IDs in arrival
    /// order. Idempotent when the buffer is empty.
    pub fn flush_buffered_events(&mut self) -> Result<Vec<HistoryEvent>, WarpflowError> {
        let mut pending: Vec<HistoryEvent> = self.record.buffered_events.clone();
        pending.extend(self.new_buffered_events.drain(..));
        let mut flushed = Vec::with_capacity(pending.len());
        for event in pending {
            flushed.push(self.add_history_event(
                event.event_type.clone(),
                event.attributes.clone(),
                event.version,
            )?);
        }
        self.record.buffered_events.clear();
        self.clear_buffered_events = true;
        Ok(flushed)
    }

    /// Empties the buffer without flushing. Idempotent.
    pub fn clear_buffered_events(&mut self) {
        self.record.buffered_events.clear();
        self.new_buffered_events.clear();
        self.clear_buffered_events = true;
    }

    pub fn upsert_activity(&mut self, activity: ActivityInfo) {
        self.dirty_activities.insert(activity.schedule_id);
        self.deleted_activities.remove(&activity.schedule_id);
        self.record
            .activity_infos
            .insert(activity.schedule_id, activity);
    }

    pub fn delete_activity(&mut self, schedule_id: EventId) {
        self.record.activity_infos.remove(&schedule_id);
        self.dirty_activities.remove(&schedule_id);
        self.deleted_activities.insert(schedule_id);
    }

    pub fn activity(&self, schedule_id: EventId) -> Option<&ActivityInfo> {
        self.record.activity_infos.get(&schedule_id)
    }

    pub fn timer(&self, timer_id: &str) -> Option<&TimerInfo> {
        self.record.timer_infos.get(timer_id)
    }

    pub fn upsert_timer(&mut self, timer: TimerInfo) {
        self.dirty_timers.insert(timer.timer_id.clone());
        self.deleted_timers.remove(&timer.timer_id);
        self.record.timer_infos.insert(timer.timer_id.clone(), timer);
    }

    pub fn delete_timer(&mut self, timer_id: &str) {
        self.record.timer_infos.remove(timer_id);
        self.dirty_timers.remove(timer_id);
        self.deleted_timers.insert(timer_id.to_string());
    }

    pub fn upsert_child_execution(&mut self, child: ChildExecutionInfo) {
        self.dirty_children.insert(child.initiated_id);
        self.deleted_children.remove(&child.initiated_id);
        self.record
            .child_execution_infos
            .insert(child.initiated_id, child);
    }

    pub fn delete_child_execution(&mut self, initiated_id: EventId) {
        self.record.child_execution_infos.remove(&initiated_id);
        self.dirty_children.remove(&initiated_id);
        self.deleted_children.insert(initiated_id);
    }

    pub fn upsert_request_cancel(&mut self, cancel: RequestCancelInfo) {
        self.dirty_cancels.insert(cancel.initiated_id);
        self.deleted_cancels.remove(&cancel.initiated_id);
        self.record
            .request_cancel_infos
            .insert(cancel.initiated_id, cancel);
    }

    pub fn delete_request_cancel(&mut self, initiated_id: EventId) {
        self.record.request_cancel_infos.remove(&initiated_id);
        self.dirty_cancels.remove(&initiated_id);
        self.deleted_cancels.insert(initiated_id);
    }

    pub fn upsert_signal(&mut self, signal: SignalInfo) {
        self.dirty_signals.insert(signal.initiated_id);
        self.deleted_signals.remove(&signal.initiated_id);
        self.record.signal_infos.insert(signal.initiated_id, signal);
    }

    pub fn delete_signal(&mut self, initiated_id: EventId) {
        self.record.signal_infos.remove(&initiated_id);
        self.dirty_signals.remove(&initiated_id);
        self.deleted_signals.insert(initiated_id);
    }

    pub fn add_signal_requested_id(&mut self, request_id: String) {
        self.removed_signal_requested.remove(&request_id);
        self.record.signal_requested_ids.insert(request_id.clone());
        self.added_signal_requested.insert(request_id);
    }

    pub fn remove_signal_requested_id(&mut self, request_id: &str) {
        self.record.signal_requested_ids.remove(request_id);
        self.added_signal_requested.remove(request_id);
        self.removed_signal_requested.insert(request_id.to_string());
    }

    pub fn add_transfer_task(&mut self, task: TransferTask) {
        self.transfer_tasks.push(task);
    }

    pub fn add_timer_task(&mut self, task: TimerTask) {
        self.timer_tasks.push(task);
    }

    pub fn add_replication_task(&mut self, task: ReplicationTask) {
        self.replication_tasks.push(task);
    }

    pub fn pending_transfer_tasks(&mut self) -> &mut Vec<TransferTask> {
        &mut self.transfer_tasks
    }

    pub fn pending_timer_tasks(&mut self) -> &mut Vec<TimerTask> {
        &mut self.timer_tasks
    }

    pub fn pending_replication_tasks(&mut self) -> &mut Vec<ReplicationTask> {
        &mut self.replication_tasks
    }

    /// Drains the accumulated changes into a mutation for an atomic commit.
    /// The working copy stays usable: its condition advances to the new
    /// `NextEventID` so a follow-up mutation CASes against the right value.
    pub fn close_as_mutation(&mut self) -> Result<WorkflowMutation, WarpflowError> {
        let info = self.record.execution_info.clone();
        validate_state_close_status(info.state, info.close_status)?;
        self.record.checksum = compute_checksum(&self.record);

        let mutation = WorkflowMutation {
            execution_info: Some(info),
            upsert_activity_infos: self
                .dirty_activities
                .iter()
                .filter_map(|id| self.record.activity_infos.get(id).cloned())
                .collect(),
            delete_activity_infos: self.deleted_activities.iter().copied().collect(),
            upsert_timer_infos: self
                .dirty_timers
                .iter()
                .filter_map(|id| self.record.timer_infos.get(id).cloned())
                .collect(),
            delete_timer_infos: self.deleted_timers.iter().cloned().collect(),
            upsert_child_execution_infos: self
                .dirty_children
                .iter()
                .filter_map(|id| self.record.child_execution_infos.get(id).cloned())
                .collect(),
            delete_child_execution_infos: self.deleted_children.iter().copied().collect(),
            upsert_request_cancel_infos: self
                .dirty_cancels
                .iter()
                .filter_map(|id| self.record.request_cancel_infos.get(id).cloned())
                .collect(),
            delete_request_cancel_infos: self.deleted_cancels.iter().copied().collect(),
            upsert_signal_infos: self
                .dirty_signals
                .iter()
                .filter_map(|id| self.record.signal_infos.get(id).cloned())
                .collect(),
            delete_signal_infos: self.deleted_signals.iter().copied().collect(),
            upsert_signal_requested_ids: self.added_signal_requested.iter().cloned().collect(),
            delete_signal_requested_ids: self.removed_signal_requested.iter().cloned().collect(),
            new_buffered_events: std::mem::take(&mut self.new_buffered_events),
            clear_buffered_events: self.clear_buffered_events,
            version_histories: Some(self.record.version_histories.clone()),
            checksum: self.record.checksum,
            condition: self.condition,
            transfer_tasks: std::mem::take(&mut self.transfer_tasks),
            timer_tasks: std::mem::take(&mut self.timer_tasks),
            replication_tasks: std::mem::take(&mut self.replication_tasks),
        };

        self.reset_dirty_tracking();
        self.condition = self.record.execution_info.next_event_id;
        Ok(mutation)
    }

    /// Drains the working copy into a full snapshot; associated maps replace
    /// the stored ones wholesale. Used by create, continue-as-new, and
    /// conflict-resolve.
    pub fn close_as_snapshot(&mut self) -> Result<WorkflowSnapshot, WarpflowError> {
        let info = self.record.execution_info.clone();
        validate_state_close_status(info.state, info.close_status)?;
        if !self.record.buffered_events.is_empty() || !self.new_buffered_events.is_empty() {
            return Err(WarpflowError::Internal(format!(
                "Cannot snapshot run {} with buffered events pending",
                info.run_id
            )));
        }
        self.record.checksum = compute_checksum(&self.record);

        let snapshot = WorkflowSnapshot {
            execution_info: Some(info),
            activity_infos: self.record.activity_infos.clone(),
            timer_infos: self.record.timer_infos.clone(),
            child_execution_infos: self.record.child_execution_infos.clone(),
            request_cancel_infos: self.record.request_cancel_infos.clone(),
            signal_infos: self.record.signal_infos.clone(),
            signal_requested_ids: self.record.signal_requested_ids.clone(),
            version_histories: self.record.version_histories.clone(),
            checksum: self.record.checksum,
            condition: self.condition,
            transfer_tasks: std::mem::take(&mut self.transfer_tasks),
            timer_tasks: std::mem::take(&mut self.timer_tasks),
            replication_tasks: std::mem::take(&mut self.replication_tasks),
        };

        self.reset_dirty_tracking();
        self.condition = self.record.execution_info.next_event_id;
        Ok(snapshot)
    }

    fn reset_dirty_tracking(&mut self) {
        self.dirty_activities.clear();
        self.deleted_activities.clear();
        self.dirty_timers.clear();
        self.deleted_timers.clear();
        self.dirty_children.clear();
        self.deleted_children.clear();
        self.dirty_cancels.clear();
        self.deleted_cancels.clear();
        self.dirty_signals.clear();
        self.deleted_signals.clear();
        self.added_signal_requested.clear();
        self.removed_signal_requested.clear();
        self.clear_buffered_events = false;
    }
}
