// tests/integration/replication_scenarios_test.rs

//! End-to-end replication scenarios: queue round trips, the history DLQ,
//! and cross-cluster domain replication.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use warpflow::core::domain::registry::RegisterDomainRequest;
use warpflow::core::domain::{
    DomainReplicationApplier, DomainReplicationProcessor, LocalReplicationClient,
};
use warpflow::core::membership::MembershipRing;
use warpflow::core::persistence::MemoryStore;
use warpflow::core::persistence::store::{DomainReplicationQueue, ExecutionStore};
use warpflow::core::persistence::types::{ReplicationTask, ReplicationTaskAttributes};

use super::fixtures::{ACTIVE_CLUSTER, STANDBY_CLUSTER, TEST_SHARD, registry, registry_over};

fn history_task(task_id: i64) -> ReplicationTask {
    ReplicationTask {
        task_id,
        creation_time: Utc::now(),
        attributes: ReplicationTaskAttributes::History {
            domain_id: "domain-1".to_string(),
            workflow_id: "w".to_string(),
            run_id: "r1".to_string(),
            first_event_id: 1,
            next_event_id: 5,
            version: 1,
            branch_token: vec![1, 2, 3],
            new_run_branch_token: None,
        },
    }
}

/// S7: DLQ put → size → range delete → empty, on the per-source history DLQ.
#[tokio::test]
async fn replication_dlq_round_trip() {
    let store = MemoryStore::new();
    for task_id in [1, 2] {
        store
            .put_replication_task_to_dlq(TEST_SHARD, "C", history_task(task_id))
            .await
            .unwrap();
    }
    assert_eq!(store.get_replication_dlq_size(TEST_SHARD, "C").await.unwrap(), 2);

    store
        .range_delete_replication_task_from_dlq(TEST_SHARD, "C", 0, 2)
        .await
        .unwrap();
    assert_eq!(store.get_replication_dlq_size(TEST_SHARD, "C").await.unwrap(), 0);
    let tasks = store
        .get_replication_tasks_from_dlq(TEST_SHARD, "C", 0, i64::MAX, 10)
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

/// Enqueue → dequeue → ack → dequeue returns nothing new.
#[tokio::test]
async fn domain_queue_round_trip() {
    let (store, registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    registry
        .register(RegisterDomainRequest {
            name: "queued".to_string(),
            retention_days: 1,
            is_global: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let messages = store.get_messages(0, 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    let last_id = messages.last().unwrap().message_id;

    store.update_ack_level(STANDBY_CLUSTER, last_id).await.unwrap();
    let ack_levels = store.get_ack_levels().await.unwrap();
    assert_eq!(ack_levels.get(STANDBY_CLUSTER), Some(&last_id));

    let remaining = store.get_messages(last_id, 10).await.unwrap();
    assert!(remaining.is_empty());
}

/// Message IDs are monotonic and gap-free per publisher.
#[tokio::test]
async fn message_ids_are_gap_free() {
    let (store, registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    for index in 0..5 {
        registry
            .register(RegisterDomainRequest {
                name: format!("d-{index}"),
                retention_days: 1,
                is_global: true,
                ..Default::default()
            })
            .await
            .unwrap();
    }
    let messages = store.get_messages(0, 100).await.unwrap();
    let ids: Vec<i64> = messages.iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

/// A global domain registered on the master propagates to the standby
/// cluster through the replication processor.
#[tokio::test]
async fn domain_replicates_across_clusters() {
    // Master side: its own store and registry.
    let (master_store, master_registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    master_registry
        .register(RegisterDomainRequest {
            name: "global-d".to_string(),
            retention_days: 2,
            is_global: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // Standby side: a separate store, with a processor pulling from the
    // master's queue.
    let standby_store = Arc::new(MemoryStore::new());
    let ring = Arc::new(MembershipRing::new(vec!["host-b".to_string()]));
    let processor = DomainReplicationProcessor::new(
        ACTIVE_CLUSTER,
        "host-b",
        ring,
        Arc::new(LocalReplicationClient::new(
            Arc::clone(&master_store) as _,
            STANDBY_CLUSTER,
        )),
        DomainReplicationApplier::new(Arc::clone(&standby_store) as _) as _,
        Arc::clone(&standby_store) as _,
        Duration::from_secs(1),
        0.2,
        Duration::from_millis(10),
        Duration::from_millis(100),
        100,
    );
    processor.poll_once().await.unwrap();

    let standby_registry = registry_over(&standby_store, STANDBY_CLUSTER, ACTIVE_CLUSTER);
    let replicated = standby_registry.describe("global-d").await.unwrap();
    assert_eq!(replicated.config.retention_days, 2);
    assert!(replicated.is_global);
    assert_eq!(
        replicated.replication_config.active_cluster_name,
        ACTIVE_CLUSTER
    );
    assert!(processor.last_processed_message_id() >= 1);
}
