// tests/unit_queue_processor_test.rs

//! Transfer-processor tests over the real scheduler: per-workflow FIFO,
//! ack advancement, and retry-then-drop disposition.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use warpflow::WarpflowError;
use warpflow::core::dynamicconfig::{
    Collection, ConfigValue, DynamicConfigKey, InMemoryConfigSource,
};
use warpflow::core::execution::ExecutionEngine;
use warpflow::core::execution::engine::StartWorkflowRequest;
use warpflow::core::persistence::MemoryStore;
use warpflow::core::persistence::store::ExecutionStore;
use warpflow::core::persistence::types::TransferTask;
use warpflow::core::queues::transfer::{TransferTaskHandler, TransferTaskSource};
use warpflow::core::queues::QueueProcessor;
use warpflow::core::shard::ShardContext;
use warpflow::core::tasks::{PriorityTaskScheduler, RateLimiter, SequentialTaskQueues};
use warpflow::core::types::CreateWorkflowMode;

/// Records the order tasks were executed in, optionally failing first.
struct RecordingHandler {
    executed: Mutex<Vec<(String, i64)>>,
    failures_per_task: u32,
    attempts: Mutex<std::collections::HashMap<i64, u32>>,
}

impl RecordingHandler {
    fn new(failures_per_task: u32) -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            failures_per_task,
            attempts: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn record(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(task.task_id).or_insert(0);
        if *attempt < self.failures_per_task {
            *attempt += 1;
            return Err(WarpflowError::Internal("transient".to_string()));
        }
        self.executed
            .lock()
            .push((task.workflow_id.clone(), task.task_id));
        Ok(())
    }
}

#[async_trait]
impl TransferTaskHandler for RecordingHandler {
    async fn handle_decision_task(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.record(task)
    }
    async fn handle_activity_task(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.record(task)
    }
    async fn handle_close_execution(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.record(task)
    }
    async fn handle_cancel_execution(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.record(task)
    }
    async fn handle_signal_execution(&self, task: &TransferTask) -> Result<(), WarpflowError> {
        self.record(task)
    }
    async fn handle_start_child_execution(
        &self,
        task: &TransferTask,
    ) -> Result<(), WarpflowError> {
        self.record(task)
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    shard: Arc<ShardContext>,
    engine: ExecutionEngine,
    handler: Arc<RecordingHandler>,
    processor: Arc<QueueProcessor<TransferTaskSource>>,
    shutdown_tx: broadcast::Sender<()>,
}

async fn harness(failures_per_task: u32) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let shard = ShardContext::acquire(Arc::clone(&store) as _, 0, "host-a")
        .await
        .unwrap();
    let engine = ExecutionEngine::new(Arc::clone(&shard), Arc::clone(&store) as _);

    let source = Arc::new(InMemoryConfigSource::new());
    source.set(DynamicConfigKey::TaskMaxRetryCount, ConfigValue::Int(2));
    source.set(
        DynamicConfigKey::EnablePersistQueueStates,
        ConfigValue::Bool(false),
    );
    let dynamic_config = Collection::new(source);

    let (scheduler, driver) = PriorityTaskScheduler::new(vec![3, 2, 1], 4);
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(driver.run(shutdown_tx.subscribe()));
    let sequential = SequentialTaskQueues::new(scheduler);

    let handler = RecordingHandler::new(failures_per_task);
    let transfer_source = TransferTaskSource::new(
        Arc::clone(&shard),
        Arc::clone(&store) as _,
        Arc::clone(&handler) as _,
        "active",
    );
    let processor = QueueProcessor::new(
        transfer_source,
        Arc::clone(&shard),
        sequential,
        Arc::new(RateLimiter::new(10_000.0, 1000)),
        10_000.0,
        100,
        Duration::from_millis(50),
        &dynamic_config,
    );
    Harness {
        store,
        shard,
        engine,
        handler,
        processor,
        shutdown_tx,
    }
}

async fn drain(harness: &Harness) {
    for _ in 0..100 {
        harness.processor.poll_once().await;
        let (remaining, _) = harness
            .store
            .get_transfer_tasks(0, 0, i64::MAX, 100, None)
            .await
            .unwrap();
        if remaining.is_empty() {
            // One more cycle to absorb outcomes and advance the ack.
            harness.processor.poll_once().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("transfer queue did not drain");
}

#[tokio::test]
async fn tasks_for_one_workflow_run_in_task_id_order() {
    let harness = harness(0).await;
    for workflow_id in ["w1", "w2", "w3"] {
        harness
            .engine
            .start_workflow(StartWorkflowRequest {
                domain_id: "domain-1".to_string(),
                workflow_id: workflow_id.to_string(),
                run_id: Some(format!("run-{workflow_id}")),
                task_list: "tl".to_string(),
                workflow_type_name: "wt".to_string(),
                workflow_timeout_seconds: 0,
                decision_timeout_seconds: 10,
                request_id: format!("req-{workflow_id}"),
                mode: CreateWorkflowMode::BrandNew,
                previous_run_id: None,
                previous_last_write_version: None,
                version: 1,
            })
            .await
            .unwrap();
    }
    drain(&harness).await;

    let executed = harness.handler.executed.lock().clone();
    assert_eq!(executed.len(), 3);
    // Per-workflow order: every workflow's tasks appear in task-ID order.
    for workflow_id in ["w1", "w2", "w3"] {
        let ids: Vec<i64> = executed
            .iter()
            .filter(|(w, _)| w == workflow_id)
            .map(|(_, id)| *id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    // The ack caught up with everything executed.
    let max_id = executed.iter().map(|(_, id)| *id).max().unwrap();
    assert!(harness.shard.transfer_ack_level().await >= max_id);
    let _ = harness.shutdown_tx.send(());
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let harness = harness(1).await;
    harness
        .engine
        .start_workflow(StartWorkflowRequest {
            domain_id: "domain-1".to_string(),
            workflow_id: "w".to_string(),
            run_id: Some("r1".to_string()),
            task_list: "tl".to_string(),
            workflow_type_name: "wt".to_string(),
            workflow_timeout_seconds: 0,
            decision_timeout_seconds: 10,
            request_id: "req".to_string(),
            mode: CreateWorkflowMode::BrandNew,
            previous_run_id: None,
            previous_last_write_version: None,
            version: 1,
        })
        .await
        .unwrap();
    drain(&harness).await;

    // One failure, then success on retry.
    assert_eq!(harness.handler.executed.lock().len(), 1);
    let _ = harness.shutdown_tx.send(());
}

#[tokio::test]
async fn exhausted_retries_drop_the_task() {
    // More failures than the configured retry budget of 2.
    let harness = harness(10).await;
    harness
        .engine
        .start_workflow(StartWorkflowRequest {
            domain_id: "domain-1".to_string(),
            workflow_id: "w".to_string(),
            run_id: Some("r1".to_string()),
            task_list: "tl".to_string(),
            workflow_type_name: "wt".to_string(),
            workflow_timeout_seconds: 0,
            decision_timeout_seconds: 10,
            request_id: "req".to_string(),
            mode: CreateWorkflowMode::BrandNew,
            previous_run_id: None,
            previous_last_write_version: None,
            version: 1,
        })
        .await
        .unwrap();
    drain(&harness).await;

    // Dropped after the retry budget; never recorded as executed, and the
    // task row is gone so the queue can advance.
    assert!(harness.handler.executed.lock().is_empty());
    let _ = harness.shutdown_tx.send(());
}
