// tests/integration/execution_scenarios_test.rs

//! End-to-end execution scenarios: current-run arbitration, zombie creates,
//! and transfer-task FIFO delivery.

use chrono::Utc;
use warpflow::WarpflowError;
use warpflow::core::execution::engine::StartWorkflowRequest;
use warpflow::core::persistence::store::ExecutionStore;
use warpflow::core::persistence::types::TransferTask;
use warpflow::core::types::{
    CloseStatus, CreateWorkflowMode, TransferTaskType, UpdateWorkflowMode, WorkflowState,
};

use super::fixtures::{TEST_SHARD, engine};

fn start_request(
    workflow_id: &str,
    run_id: &str,
    mode: CreateWorkflowMode,
) -> StartWorkflowRequest {
    StartWorkflowRequest {
        domain_id: "domain-1".to_string(),
        workflow_id: workflow_id.to_string(),
        run_id: Some(run_id.to_string()),
        task_list: "tl".to_string(),
        workflow_type_name: "wt".to_string(),
        workflow_timeout_seconds: 60,
        decision_timeout_seconds: 10,
        request_id: format!("req-{run_id}"),
        mode,
        previous_run_id: None,
        previous_last_write_version: None,
        version: 1,
    }
}

/// S4: a second brand-new create for the same workflow ID reports the run
/// that already owns the current pointer.
#[tokio::test]
async fn brand_new_create_rejects_live_current() {
    let (_store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();

    let err = engine
        .start_workflow(start_request("w", "r2", CreateWorkflowMode::BrandNew))
        .await
        .unwrap_err();
    match err {
        WarpflowError::AlreadyStarted(started) => {
            assert_eq!(started.run_id, "r1");
            assert_eq!(started.state, WorkflowState::Running);
            assert_eq!(started.close_status, CloseStatus::None);
        }
        other => panic!("expected AlreadyStarted, got {other:?}"),
    }
}

/// S5: a zombie create coexists with a live current run and never touches
/// the current pointer.
#[tokio::test]
async fn zombie_create_leaves_current_untouched() {
    let (_store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();
    engine
        .start_workflow(start_request("w", "rz", CreateWorkflowMode::Zombie))
        .await
        .unwrap();

    assert_eq!(engine.get_current_run_id("domain-1", "w").await.unwrap(), "r1");
    let zombie = engine
        .load_mutable_state("domain-1", "w", "rz")
        .await
        .unwrap();
    assert_eq!(zombie.info().state, WorkflowState::Zombie);
}

/// S6: transfer tasks come back in task-ID order page by page, and a range
/// complete empties the queue.
#[tokio::test]
async fn transfer_task_fifo_and_range_complete() {
    let (store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();

    // One update producing activity, decision, and close tasks, in order.
    let mut state = engine.load_mutable_state("domain-1", "w", "r1").await.unwrap();
    for task_type in [
        TransferTaskType::ActivityTask,
        TransferTaskType::DecisionTask,
        TransferTaskType::CloseExecution,
    ] {
        state.add_transfer_task(TransferTask {
            task_id: 0,
            domain_id: "domain-1".to_string(),
            workflow_id: "w".to_string(),
            run_id: "r1".to_string(),
            task_type,
            target_domain_id: None,
            target_workflow_id: None,
            target_run_id: None,
            task_list: "tl".to_string(),
            schedule_id: 0,
            version: 1,
            visibility_timestamp: Utc::now(),
        });
    }
    engine
        .commit_update(&mut state, UpdateWorkflowMode::UpdateCurrent)
        .await
        .unwrap();

    // Page through with page size 1; the kinds arrive in submission order
    // after the initial decision task from the create.
    let mut kinds = Vec::new();
    let mut last_ids = Vec::new();
    let mut token = None;
    loop {
        let (page, next) = store
            .get_transfer_tasks(TEST_SHARD, 0, i64::MAX, 1, token)
            .await
            .unwrap();
        for task in &page {
            kinds.push(task.task_type);
            last_ids.push(task.task_id);
        }
        match next {
            Some(next_token) => token = Some(next_token),
            None => break,
        }
    }
    assert_eq!(
        kinds,
        vec![
            TransferTaskType::DecisionTask,
            TransferTaskType::ActivityTask,
            TransferTaskType::DecisionTask,
            TransferTaskType::CloseExecution,
        ]
    );
    let mut sorted = last_ids.clone();
    sorted.sort_unstable();
    assert_eq!(last_ids, sorted, "tasks must arrive in task-ID order");

    store
        .range_complete_transfer_task(TEST_SHARD, 0, *last_ids.last().unwrap())
        .await
        .unwrap();
    let (page, _) = store
        .get_transfer_tasks(TEST_SHARD, 0, i64::MAX, 10, None)
        .await
        .unwrap();
    assert!(page.is_empty());
}

/// Create → Get → no-op update → Get is indistinguishable from
/// Create → Get → Get.
#[tokio::test]
async fn noop_update_changes_nothing() {
    let (store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();

    let before = store
        .get_workflow_execution(TEST_SHARD, "domain-1", "w", "r1")
        .await
        .unwrap();
    let mut state = engine.load_mutable_state("domain-1", "w", "r1").await.unwrap();
    engine
        .commit_update(&mut state, UpdateWorkflowMode::UpdateCurrent)
        .await
        .unwrap();
    let after = store
        .get_workflow_execution(TEST_SHARD, "domain-1", "w", "r1")
        .await
        .unwrap();
    assert_eq!(before, after);
}

/// Continue-as-new closes the old run, seeds the successor atomically, and
/// moves the current pointer.
#[tokio::test]
async fn continue_as_new_moves_current() {
    let (_store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();

    let mut state = engine.load_mutable_state("domain-1", "w", "r1").await.unwrap();
    let new_run_id = engine.continue_as_new(&mut state, 1).await.unwrap();

    let old = engine.load_mutable_state("domain-1", "w", "r1").await.unwrap();
    assert_eq!(old.info().state, WorkflowState::Completed);
    assert_eq!(old.info().close_status, CloseStatus::ContinuedAsNew);

    let current = engine.get_current_run_id("domain-1", "w").await.unwrap();
    assert_eq!(current, new_run_id);
    let new_state = engine
        .load_mutable_state("domain-1", "w", &new_run_id)
        .await
        .unwrap();
    assert_eq!(new_state.info().state, WorkflowState::Running);
}

/// The two-step delete removes the pointer and then the record.
#[tokio::test]
async fn delete_workflow_is_complete() {
    let (_store, _shard, engine) = engine().await;
    engine
        .start_workflow(start_request("w", "r1", CreateWorkflowMode::BrandNew))
        .await
        .unwrap();
    engine
        .delete_workflow_execution("domain-1", "w", "r1")
        .await
        .unwrap();

    assert!(matches!(
        engine.get_current_run_id("domain-1", "w").await.unwrap_err(),
        WarpflowError::EntityNotExists(_)
    ));
    assert!(matches!(
        engine
            .load_mutable_state("domain-1", "w", "r1")
            .await
            .unwrap_err(),
        WarpflowError::EntityNotExists(_)
    ));
}
