// tests/unit_shard_test.rs

//! Shard context and controller tests: lease acquisition, task-ID block
//! allocation, quarantine on ownership loss, and ring-driven rebalance.

use std::sync::Arc;
use std::time::Duration;

use warpflow::WarpflowError;
use warpflow::core::membership::MembershipRing;
use warpflow::core::persistence::MemoryStore;
use warpflow::core::persistence::store::ShardStore;
use warpflow::core::shard::{ShardContext, ShardController};

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn acquire_bumps_range_id_and_owner() {
    let store = store();
    let shard = ShardContext::acquire(Arc::clone(&store) as _, 3, "host-a")
        .await
        .unwrap();
    assert_eq!(shard.range_id().await, 1);

    let persisted = store.get_shard(3).await.unwrap();
    assert_eq!(persisted.owner, "host-a");
    assert_eq!(persisted.range_id, 1);

    // A second acquisition (new owner) bumps the range again.
    let stolen = ShardContext::acquire(Arc::clone(&store) as _, 3, "host-b")
        .await
        .unwrap();
    assert_eq!(stolen.range_id().await, 2);
    assert_eq!(store.get_shard(3).await.unwrap().owner, "host-b");
}

#[tokio::test]
async fn task_ids_are_monotonic_and_range_prefixed() {
    let store = store();
    let shard = ShardContext::acquire(Arc::clone(&store) as _, 0, "host-a")
        .await
        .unwrap();
    let ids = shard.allocate_task_ids(100).await.unwrap();
    for window in ids.windows(2) {
        assert!(window[0] < window[1]);
    }
    // All drawn from the range-1 block.
    assert_eq!(ids[0] >> 24, 1);
}

#[tokio::test]
async fn quarantined_shard_fails_fast() {
    let store = store();
    let shard = ShardContext::acquire(Arc::clone(&store) as _, 0, "host-a")
        .await
        .unwrap();

    // Another host takes the shard; the stored range moves past ours.
    let _thief = ShardContext::acquire(Arc::clone(&store) as _, 0, "host-b")
        .await
        .unwrap();

    // Our next persist CAS-fails and quarantines the context.
    let err = shard.persist().await.unwrap_err();
    assert!(matches!(err, WarpflowError::ShardOwnershipLost { .. }));
    assert!(shard.is_quarantined());

    // Every further write fails fast without touching the store.
    let err = shard.allocate_task_id().await.unwrap_err();
    assert!(matches!(err, WarpflowError::ShardOwnershipLost { .. }));
    let err = shard.persist().await.unwrap_err();
    assert!(matches!(err, WarpflowError::ShardOwnershipLost { .. }));
}

#[tokio::test]
async fn ack_levels_never_regress() {
    let store = store();
    let shard = ShardContext::acquire(Arc::clone(&store) as _, 0, "host-a")
        .await
        .unwrap();
    shard.update_transfer_ack_level(10).await;
    shard.update_transfer_ack_level(5).await;
    assert_eq!(shard.transfer_ack_level().await, 10);

    shard.update_cluster_replication_level("standby", 7).await;
    shard.update_cluster_replication_level("standby", 3).await;
    assert_eq!(shard.cluster_replication_level("standby").await, 7);

    let stats = shard.stats().await;
    assert_eq!(stats.transfer_ack_level, 10);
    assert_eq!(stats.range_id, 1);
    assert!(!stats.quarantined);
}

#[tokio::test]
async fn controller_acquires_assigned_shards() {
    let store = store();
    let ring = Arc::new(MembershipRing::new(vec!["host-a".to_string()]));
    let controller = ShardController::new(
        "host-a",
        4,
        Arc::clone(&store) as _,
        Arc::clone(&ring),
        Duration::from_secs(300),
        Duration::from_secs(300),
    );
    controller.rebalance().await;
    assert_eq!(controller.owned_shards().len(), 4);
    for shard_id in 0..4 {
        assert!(controller.shard(shard_id).is_some());
    }
}

#[tokio::test]
async fn controller_releases_on_ring_change() {
    let store = store();
    let ring = Arc::new(MembershipRing::new(vec!["host-a".to_string()]));
    let controller = ShardController::new(
        "host-a",
        32,
        Arc::clone(&store) as _,
        Arc::clone(&ring),
        Duration::from_secs(300),
        Duration::from_secs(300),
    );
    controller.rebalance().await;
    assert_eq!(controller.owned_shards().len(), 32);

    // Another host joins; this controller must shed the shards that moved.
    ring.set_members(vec!["host-a".to_string(), "host-b".to_string()]);
    controller.rebalance().await;
    let owned = controller.owned_shards().len();
    assert!(owned < 32, "some shards must move to host-b");
    for shard in controller.owned_shards() {
        assert_eq!(shard.owner(), "host-a");
    }
}

#[tokio::test]
async fn workflow_hashing_is_stable() {
    let store = store();
    let ring = Arc::new(MembershipRing::new(vec!["host-a".to_string()]));
    let controller = ShardController::new(
        "host-a",
        16,
        Arc::clone(&store) as _,
        ring,
        Duration::from_secs(300),
        Duration::from_secs(300),
    );
    let first = controller.shard_for_workflow("domain-1", "wf-42");
    let second = controller.shard_for_workflow("domain-1", "wf-42");
    assert_eq!(first, second);
    assert!(first < 16);
}
