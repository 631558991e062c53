// tests/unit_mutable_state_test.rs

//! Mutable-state working-copy tests: the state table, event ID monotonicity,
//! buffered events, dirty tracking, and checksum verification.

use chrono::Utc;
use warpflow::WarpflowError;
use warpflow::core::execution::MutableState;
use warpflow::core::execution::mutable_state::{compute_checksum, verify_checksum};
use warpflow::core::persistence::types::{ActivityInfo, HistoryEvent, WorkflowExecutionInfo};
use warpflow::core::types::{CloseStatus, WorkflowState};

fn running_state() -> MutableState {
    let mut info = WorkflowExecutionInfo::new("domain-1", "w", "r1");
    info.state = WorkflowState::Running;
    MutableState::new_execution(info)
}

fn activity(schedule_id: i64) -> ActivityInfo {
    ActivityInfo {
        version: 1,
        schedule_id,
        scheduled_time: Utc::now(),
        started_id: 0,
        started_time: None,
        activity_id: format!("act-{schedule_id}"),
        request_id: String::new(),
        schedule_to_start_timeout_seconds: 10,
        schedule_to_close_timeout_seconds: 20,
        start_to_close_timeout_seconds: 10,
        heartbeat_timeout_seconds: 0,
        cancel_requested: false,
        attempt: 0,
        last_heartbeat_details: None,
    }
}

fn buffered(event_type: &str) -> HistoryEvent {
    HistoryEvent {
        event_id: 0,
        version: 1,
        event_type: event_type.to_string(),
        timestamp: Utc::now(),
        attributes: serde_json::json!({}),
    }
}

#[test]
fn close_status_requires_completed_state() {
    let mut state = running_state();
    assert!(state
        .set_state(WorkflowState::Running, CloseStatus::Completed)
        .is_err());
    assert!(state
        .set_state(WorkflowState::Completed, CloseStatus::None)
        .is_err());
    assert!(state
        .set_state(WorkflowState::Completed, CloseStatus::Failed)
        .is_ok());
}

#[test]
fn terminal_state_never_reopens() {
    let mut state = running_state();
    state
        .set_state(WorkflowState::Completed, CloseStatus::Completed)
        .unwrap();
    let err = state
        .set_state(WorkflowState::Running, CloseStatus::None)
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[test]
fn next_event_id_strictly_increases() {
    let mut state = running_state();
    let mut previous = state.info().next_event_id;
    for _ in 0..5 {
        let event = state
            .add_history_event("Something", serde_json::json!({}), 1)
            .unwrap();
        assert_eq!(event.event_id, previous);
        assert_eq!(state.info().next_event_id, previous + 1);
        previous += 1;
    }
}

#[test]
fn buffered_events_flush_in_arrival_order() {
    let mut state = running_state();
    state.buffer_event(buffered("SignalA"));
    state.buffer_event(buffered("SignalB"));
    let flushed = state.flush_buffered_events().unwrap();
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[0].event_type, "SignalA");
    assert_eq!(flushed[1].event_type, "SignalB");
    assert!(flushed[0].event_id < flushed[1].event_id);
    assert!(state.buffered_events().is_empty());
}

#[test]
fn clear_buffered_events_is_idempotent() {
    let mut state = running_state();
    state.buffer_event(buffered("SignalA"));
    state.clear_buffered_events();
    state.clear_buffered_events();
    let mutation = state.close_as_mutation().unwrap();
    assert!(mutation.clear_buffered_events);
    assert!(mutation.new_buffered_events.is_empty());
}

#[test]
fn mutation_collects_dirty_entries_only() {
    let mut state = running_state();
    state.upsert_activity(activity(5));
    state.upsert_activity(activity(6));
    let _ = state.close_as_mutation().unwrap();

    // Only changes since the last commit are collected.
    state.upsert_activity(activity(7));
    state.delete_activity(5);
    let mutation = state.close_as_mutation().unwrap();
    assert_eq!(mutation.upsert_activity_infos.len(), 1);
    assert_eq!(mutation.upsert_activity_infos[0].schedule_id, 7);
    assert_eq!(mutation.delete_activity_infos, vec![5]);
}

#[test]
fn condition_tracks_committed_next_event_id() {
    let mut state = running_state();
    let initial_condition = state.condition();
    state
        .add_history_event("Something", serde_json::json!({}), 1)
        .unwrap();
    let mutation = state.close_as_mutation().unwrap();
    assert_eq!(mutation.condition, initial_condition);
    // The next commit must CAS against the advanced value.
    assert_eq!(state.condition(), initial_condition + 1);
}

#[test]
fn upsert_then_delete_leaves_a_delete() {
    let mut state = running_state();
    state.upsert_activity(activity(9));
    state.delete_activity(9);
    let mutation = state.close_as_mutation().unwrap();
    assert!(mutation.upsert_activity_infos.is_empty());
    assert_eq!(mutation.delete_activity_infos, vec![9]);
}

#[test]
fn checksum_round_trips_and_detects_corruption() {
    let mut state = running_state();
    state.upsert_activity(activity(3));
    let snapshot = state.close_as_snapshot().unwrap();
    assert_ne!(snapshot.checksum, 0);

    // Reconstruct the record the way the store does and verify.
    let mut record = warpflow::core::persistence::types::WorkflowMutableStateRecord {
        execution_info: snapshot.execution_info.clone().unwrap(),
        activity_infos: snapshot.activity_infos.clone(),
        timer_infos: snapshot.timer_infos.clone(),
        child_execution_infos: snapshot.child_execution_infos.clone(),
        request_cancel_infos: snapshot.request_cancel_infos.clone(),
        signal_infos: snapshot.signal_infos.clone(),
        signal_requested_ids: snapshot.signal_requested_ids.clone(),
        buffered_events: Vec::new(),
        version_histories: snapshot.version_histories.clone(),
        checksum: snapshot.checksum,
    };
    verify_checksum(&record).unwrap();
    assert_eq!(compute_checksum(&record), record.checksum);

    // Tampering with an associated map invalidates the checksum.
    record.activity_infos.insert(99, activity(99));
    assert!(verify_checksum(&record).is_err());
}

#[test]
fn snapshot_rejects_pending_buffered_events() {
    let mut state = running_state();
    state.buffer_event(buffered("SignalA"));
    assert!(state.close_as_snapshot().is_err());
}
