// tests/unit_domain_registry_test.rs

//! Domain registry tests: validation, master-cluster gating, merge
//! semantics of Data and BadBinaries, deprecation, and listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use warpflow::WarpflowError;
use warpflow::config::{ClusterConfig, ClusterEntry};
use warpflow::core::domain::DomainRegistry;
use warpflow::core::domain::registry::{RegisterDomainRequest, UpdateDomainRequest};
use warpflow::core::persistence::MemoryStore;
use warpflow::core::persistence::types::BadBinaryInfo;
use warpflow::core::types::{ArchivalStatus, DomainStatus};

const LOCAL: &str = "active";
const REMOTE: &str = "standby";

fn cluster_config(current: &str, master: &str) -> ClusterConfig {
    ClusterConfig {
        current_cluster: current.to_string(),
        master_cluster: master.to_string(),
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

fn registry(current: &str, master: &str) -> Arc<DomainRegistry> {
    let store = Arc::new(MemoryStore::new());
    DomainRegistry::new(
        Arc::clone(&store) as _,
        store as _,
        cluster_config(current, master),
        1,
        Duration::ZERO,
        Duration::from_secs(10),
    )
}

fn register(name: &str) -> RegisterDomainRequest {
    RegisterDomainRequest {
        name: name.to_string(),
        retention_days: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn rejects_empty_name_and_low_retention() {
    let registry = registry(LOCAL, LOCAL);
    let err = registry.register(register("")).await.unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));

    let err = registry
        .register(RegisterDomainRequest {
            retention_days: 0,
            ..register("short")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn rejects_duplicate_name() {
    let registry = registry(LOCAL, LOCAL);
    registry.register(register("dup")).await.unwrap();
    let err = registry.register(register("dup")).await.unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn rejects_unknown_cluster() {
    let registry = registry(LOCAL, LOCAL);
    let err = registry
        .register(RegisterDomainRequest {
            is_global: true,
            clusters: Some(vec![LOCAL.to_string(), "nowhere".to_string()]),
            ..register("bad-cluster")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn rejects_enabled_archival_without_uri() {
    let registry = registry(LOCAL, LOCAL);
    let err = registry
        .register(RegisterDomainRequest {
            history_archival_status: Some(ArchivalStatus::Enabled),
            ..register("archival")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn global_domain_spans_all_clusters_by_default() {
    let registry = registry(LOCAL, LOCAL);
    registry
        .register(RegisterDomainRequest {
            is_global: true,
            ..register("global")
        })
        .await
        .unwrap();
    let record = registry.describe("global").await.unwrap();
    assert_eq!(
        record.replication_config.clusters,
        vec![LOCAL.to_string(), REMOTE.to_string()]
    );
    // The initial failover version maps back to the active cluster.
    assert_eq!(record.failover_version, 1);
}

#[tokio::test]
async fn update_merges_data_latest_wins() {
    let registry = registry(LOCAL, LOCAL);
    registry
        .register(RegisterDomainRequest {
            data: HashMap::from([
                ("k1".to_string(), "v1".to_string()),
                ("k2".to_string(), "v2".to_string()),
            ]),
            ..register("data")
        })
        .await
        .unwrap();

    let record = registry
        .update(UpdateDomainRequest {
            name: "data".to_string(),
            data: Some(HashMap::from([
                ("k2".to_string(), "v2b".to_string()),
                ("k3".to_string(), "v3".to_string()),
            ])),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.info.data.get("k1").unwrap(), "v1");
    assert_eq!(record.info.data.get("k2").unwrap(), "v2b");
    assert_eq!(record.info.data.get("k3").unwrap(), "v3");
}

#[tokio::test]
async fn bad_binaries_are_stamped_on_write() {
    let registry = registry(LOCAL, LOCAL);
    registry.register(register("binaries")).await.unwrap();

    let record = registry
        .update(UpdateDomainRequest {
            name: "binaries".to_string(),
            bad_binaries: Some(HashMap::from([(
                "checksum-1".to_string(),
                BadBinaryInfo {
                    reason: "bad deploy".to_string(),
                    operator: "oncall".to_string(),
                    created_time_nano: 0,
                },
            )])),
            ..Default::default()
        })
        .await
        .unwrap();
    let binary = record.config.bad_binaries.get("checksum-1").unwrap();
    assert_eq!(binary.reason, "bad deploy");
    assert!(binary.created_time_nano > 0, "stamp must be attached");
}

#[tokio::test]
async fn non_master_cannot_touch_global_attributes() {
    // Registration of a global domain is rejected on a non-master cluster,
    // so seed the record through a master-side registry sharing the store,
    // as replication would.
    let store = Arc::new(MemoryStore::new());
    let master = DomainRegistry::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        cluster_config(LOCAL, LOCAL),
        1,
        Duration::ZERO,
        Duration::from_secs(10),
    );
    master
        .register(RegisterDomainRequest {
            is_global: true,
            ..register("guarded")
        })
        .await
        .unwrap();
    let standby = DomainRegistry::new(
        Arc::clone(&store) as _,
        store as _,
        cluster_config(REMOTE, LOCAL),
        1,
        Duration::ZERO,
        Duration::from_secs(10),
    );

    let err = standby
        .update(UpdateDomainRequest {
            name: "guarded".to_string(),
            description: Some("not allowed".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn deprecate_blocks_further_updates() {
    let registry = registry(LOCAL, LOCAL);
    registry.register(register("old")).await.unwrap();
    registry.deprecate("old").await.unwrap();

    let record = registry.describe("old").await.unwrap();
    assert_eq!(record.info.status, DomainStatus::Deprecated);

    let err = registry
        .update(UpdateDomainRequest {
            name: "old".to_string(),
            description: Some("too late".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WarpflowError::BadRequest(_)));
}

#[tokio::test]
async fn list_pages_with_stable_token() {
    let registry = registry(LOCAL, LOCAL);
    for index in 0..5 {
        registry.register(register(&format!("dom-{index}"))).await.unwrap();
    }

    let (first_page, token) = registry.list(2, None).await.unwrap();
    assert_eq!(first_page.len(), 2);
    let token = token.expect("more pages must remain");

    let (second_page, _) = registry.list(2, Some(token)).await.unwrap();
    assert_eq!(second_page.len(), 2);
    // Pages are disjoint and ordered.
    assert!(first_page[1].info.name < second_page[0].info.name);
}
