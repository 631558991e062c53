// tests/unit_domain_failover_test.rs

//! Failover rules: version minting, cooldown, graceful preconditions, the
//! zero-timeout degradation, and the watchdog completing expired failovers.

use std::sync::Arc;
use std::time::Duration;

use warpflow::WarpflowError;
use warpflow::config::{ClusterConfig, ClusterEntry};
use warpflow::core::domain::registry::{RegisterDomainRequest, UpdateDomainRequest};
use warpflow::core::domain::{DomainRegistry, FailoverWatchdog};
use warpflow::core::persistence::MemoryStore;
use warpflow::core::types::EMPTY_VERSION;

const LOCAL: &str = "active";
const REMOTE: &str = "standby";

fn cluster_config() -> ClusterConfig {
    ClusterConfig {
        current_cluster: LOCAL.to_string(),
        master_cluster: LOCAL.to_string(),
        failover_version_increment: 10,
        clusters: vec![
            ClusterEntry {
                name: LOCAL.to_string(),
                initial_failover_version: 1,
                rpc_address: String::new(),
            },
            ClusterEntry {
                name: REMOTE.to_string(),
                initial_failover_version: 2,
                rpc_address: String::new(),
            },
        ],
    }
}

fn registry_with_cooldown(cooldown: Duration) -> Arc<DomainRegistry> {
    let store = Arc::new(MemoryStore::new());
    DomainRegistry::new(
        Arc::clone(&store) as _,
        store as _,
        cluster_config(),
        1,
        cooldown,
        Duration::from_secs(10),
    )
}

async fn global_domain(registry: &Arc<DomainRegistry>, name: &str, active: &str) {
    registry
        .register(RegisterDomainRequest {
            name: name.to_string(),
            retention_days: 1,
            is_global: true,
            active_cluster_name: Some(active.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
}

fn failover(name: &str, target: &str) -> UpdateDomainRequest {
    UpdateDomainRequest {
        name: name.to_string(),
        active_cluster_name: Some(target.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn force_failover_mints_strictly_increasing_versions() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", REMOTE).await;
    let v0 = registry.describe("d").await.unwrap().failover_version;

    let first = registry.update(failover("d", LOCAL)).await.unwrap();
    assert!(first.failover_version > v0);
    assert!(first.failover_end_time.is_none());
    assert_eq!(first.previous_failover_version, EMPTY_VERSION);

    let second = registry.update(failover("d", REMOTE)).await.unwrap();
    assert!(second.failover_version > first.failover_version);
}

#[tokio::test]
async fn rejected_failover_leaves_version_untouched() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", REMOTE).await;
    let before = registry.describe("d").await.unwrap();

    // Target outside the domain's cluster list.
    let err = registry
        .update(UpdateDomainRequest {
            name: "d".to_string(),
            clusters: Some(vec![REMOTE.to_string()]),
            active_cluster_name: Some(LOCAL.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));

    let after = registry.describe("d").await.unwrap();
    assert_eq!(after.failover_version, before.failover_version);
    assert_eq!(
        after.replication_config.active_cluster_name,
        before.replication_config.active_cluster_name
    );
}

#[tokio::test]
async fn cooldown_blocks_rapid_failovers() {
    let registry = registry_with_cooldown(Duration::from_secs(3600));
    global_domain(&registry, "d", REMOTE).await;

    // Registration stamped the domain just now; the cooldown is still open.
    let err = registry.update(failover("d", LOCAL)).await.unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn graceful_failover_requires_local_target() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", LOCAL).await;

    let err = registry
        .update(UpdateDomainRequest {
            failover_timeout_seconds: Some(60),
            ..failover("d", REMOTE)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn graceful_failover_rejects_concurrent_graceful() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", REMOTE).await;

    let first = registry
        .update(UpdateDomainRequest {
            failover_timeout_seconds: Some(3600),
            ..failover("d", LOCAL)
        })
        .await
        .unwrap();
    assert!(first.failover_end_time.is_some());

    // While one graceful failover is in flight, a second one is rejected.
    let err = registry
        .update(UpdateDomainRequest {
            failover_timeout_seconds: Some(3600),
            ..failover("d", REMOTE)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn zero_timeout_degrades_to_force() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", REMOTE).await;

    let record = registry
        .update(UpdateDomainRequest {
            failover_timeout_seconds: Some(0),
            ..failover("d", LOCAL)
        })
        .await
        .unwrap();
    assert!(record.failover_end_time.is_none());
    assert_eq!(record.previous_failover_version, EMPTY_VERSION);
}

#[tokio::test]
async fn failover_timeout_without_failover_is_rejected() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", LOCAL).await;

    let err = registry
        .update(UpdateDomainRequest {
            name: "d".to_string(),
            failover_timeout_seconds: Some(60),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn watchdog_completes_expired_graceful_failover() {
    let registry = registry_with_cooldown(Duration::ZERO);
    global_domain(&registry, "d", REMOTE).await;

    // A one-second graceful window that expires immediately for the test.
    let record = registry
        .update(UpdateDomainRequest {
            failover_timeout_seconds: Some(1),
            ..failover("d", LOCAL)
        })
        .await
        .unwrap();
    assert!(record.failover_end_time.is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let watchdog = FailoverWatchdog::new(Arc::clone(&registry), Duration::from_secs(60));
    watchdog.scan_once().await;

    let after = registry.describe("d").await.unwrap();
    assert!(after.failover_end_time.is_none());
}
