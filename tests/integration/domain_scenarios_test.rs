// tests/integration/domain_scenarios_test.rs

//! End-to-end domain lifecycle scenarios: local registration, master-cluster
//! gating, and graceful failover.

use warpflow::WarpflowError;
use warpflow::core::domain::registry::{RegisterDomainRequest, UpdateDomainRequest};
use warpflow::core::persistence::store::DomainReplicationQueue;
use warpflow::core::types::{ArchivalStatus, DomainStatus, EMPTY_VERSION};

use super::fixtures::{ACTIVE_CLUSTER, STANDBY_CLUSTER, registry};

/// S1: a local domain registered on a non-master cluster comes back from
/// Describe with every default applied and a generated UUID.
#[tokio::test]
async fn local_domain_register_describe() {
    // Standby is not the master; local registration still succeeds.
    let (_store, registry) = registry(STANDBY_CLUSTER, ACTIVE_CLUSTER);
    let id = registry
        .register(RegisterDomainRequest {
            name: "D1".to_string(),
            retention_days: 1,
            is_global: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!id.is_empty());

    let record = registry.describe("D1").await.unwrap();
    assert_eq!(record.info.name, "D1");
    assert_eq!(record.info.status, DomainStatus::Registered);
    assert!(record.info.data.is_empty());
    assert_eq!(record.config.retention_days, 1);
    assert!(record.config.emit_metric);
    assert_eq!(
        record.config.history_archival_status,
        ArchivalStatus::Disabled
    );
    assert_eq!(record.config.history_archival_uri, "");
    assert!(record.config.bad_binaries.is_empty());
    assert_eq!(
        record.replication_config.active_cluster_name,
        STANDBY_CLUSTER
    );
    assert_eq!(
        record.replication_config.clusters,
        vec![STANDBY_CLUSTER.to_string()]
    );
    assert_eq!(record.failover_version, EMPTY_VERSION);
    assert!(!record.is_global);
    assert_eq!(record.info.id, id);
}

/// S2: registering a global domain on a non-master cluster is rejected and
/// leaves no trace.
#[tokio::test]
async fn global_domain_on_non_master_rejected() {
    let (_store, registry) = registry(STANDBY_CLUSTER, ACTIVE_CLUSTER);
    let err = registry
        .register(RegisterDomainRequest {
            name: "D2".to_string(),
            retention_days: 1,
            is_global: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));

    let err = registry.describe("D2").await.unwrap_err();
    assert!(matches!(err, WarpflowError::EntityNotExists(_)));
}

/// S3: a graceful failover moves the active cluster, mints the next
/// failover version, records the previous one, stamps the deadline, and
/// publishes exactly one replication message.
#[tokio::test]
async fn graceful_failover() {
    let (store, registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    registry
        .register(RegisterDomainRequest {
            name: "D3".to_string(),
            retention_days: 1,
            is_global: true,
            active_cluster_name: Some(STANDBY_CLUSTER.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let before = registry.describe("D3").await.unwrap();
    let v0 = before.failover_version;
    let messages_before = store.get_messages(0, 100).await.unwrap().len();

    let after = registry
        .update(UpdateDomainRequest {
            name: "D3".to_string(),
            active_cluster_name: Some(ACTIVE_CLUSTER.to_string()),
            failover_timeout_seconds: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(after.replication_config.active_cluster_name, ACTIVE_CLUSTER);
    assert_eq!(
        after.failover_version,
        cluster_next_version(ACTIVE_CLUSTER, v0)
    );
    assert_eq!(after.previous_failover_version, v0);
    assert!(after.failover_end_time.is_some());

    let messages_after = store.get_messages(0, 100).await.unwrap().len();
    assert_eq!(messages_after, messages_before + 1);

    // The domain now accepts user-initiated writes on this cluster.
    assert!(registry.is_active_locally("D3").await.unwrap());
}

fn cluster_next_version(cluster: &str, current: i64) -> i64 {
    super::fixtures::cluster_config(ACTIVE_CLUSTER, ACTIVE_CLUSTER)
        .next_failover_version(cluster, current)
}

/// A force failover after a graceful one aborts it: the deadline clears and
/// the version advances again.
#[tokio::test]
async fn force_failover_aborts_graceful() {
    let (_store, registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    registry
        .register(RegisterDomainRequest {
            name: "D4".to_string(),
            retention_days: 1,
            is_global: true,
            active_cluster_name: Some(STANDBY_CLUSTER.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let graceful = registry
        .update(UpdateDomainRequest {
            name: "D4".to_string(),
            active_cluster_name: Some(ACTIVE_CLUSTER.to_string()),
            failover_timeout_seconds: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(graceful.failover_end_time.is_some());

    let forced = registry
        .update(UpdateDomainRequest {
            name: "D4".to_string(),
            active_cluster_name: Some(STANDBY_CLUSTER.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(forced.failover_end_time.is_none());
    assert!(forced.failover_version > graceful.failover_version);
}

/// Register → Describe round-trips the persisted fields verbatim; the UUID
/// is generated exactly once.
#[tokio::test]
async fn register_describe_is_stable() {
    let (_store, registry) = registry(ACTIVE_CLUSTER, ACTIVE_CLUSTER);
    let id = registry
        .register(RegisterDomainRequest {
            name: "stable".to_string(),
            description: "a domain".to_string(),
            owner_email: "owner@example.com".to_string(),
            retention_days: 3,
            ..Default::default()
        })
        .await
        .unwrap();

    let first = registry.describe("stable").await.unwrap();
    let second = registry.describe("stable").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.info.id, id);
    assert_eq!(first.info.description, "a domain");
    assert_eq!(first.info.owner_email, "owner@example.com");
    assert_eq!(first.config.retention_days, 3);
}
