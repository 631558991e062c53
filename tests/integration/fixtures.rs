// tests/integration/fixtures.rs

//! Shared builders for the integration tests: cluster configurations,
//! stores, registries, and per-shard engines.

use std::sync::Arc;
use std::time::Duration;

use warpflow::config::{ClusterConfig, ClusterEntry};
use warpflow::core::domain::DomainRegistry;
use warpflow::core::execution::ExecutionEngine;
use warpflow::core::persistence::MemoryStore;
use warpflow::core::shard::ShardContext;

pub const ACTIVE_CLUSTER: &str = "active";
pub const STANDBY_CLUSTER: &str = "standby";
pub const TEST_SHARD: u32 = 0;

/// A two-cluster replication group; `current` selects which side the
/// returned config describes.
pub fn cluster_config(current: &str, master: &str) -> ClusterConfig {
    ClusterConfig {
        current_cluster: current.to_string(),
        master_cluster: master.to_string(),
        failover_version_increment: 10,
        clusters: vec![
            ClusterEntry {
                name: ACTIVE_CLUSTER.to_string(),
                initial_failover_version: 1,
                rpc_address: String::new(),
            },
            ClusterEntry {
                name: STANDBY_CLUSTER.to_string(),
                initial_failover_version: 2,
                rpc_address: String::new(),
            },
        ],
    }
}

/// A registry over a fresh store with no failover cooldown, so tests can
/// fail over immediately after registration.
pub fn registry(current: &str, master: &str) -> (Arc<MemoryStore>, Arc<DomainRegistry>) {
    let store = Arc::new(MemoryStore::new());
    let registry = DomainRegistry::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        cluster_config(current, master),
        1,
        Duration::ZERO,
        Duration::from_secs(10),
    );
    (store, registry)
}

/// A registry sharing the caller's store, for multi-cluster scenarios.
pub fn registry_over(
    store: &Arc<MemoryStore>,
    current: &str,
    master: &str,
) -> Arc<DomainRegistry> {
    DomainRegistry::new(
        Arc::clone(store) as _,
        Arc::clone(store) as _,
        cluster_config(current, master),
        1,
        Duration::ZERO,
        Duration::from_secs(10),
    )
}

/// An engine over an acquired shard on a fresh store.
pub async fn engine() -> (Arc<MemoryStore>, Arc<ShardContext>, ExecutionEngine) {
    let store = Arc::new(MemoryStore::new());
    let shard = ShardContext::acquire(Arc::clone(&store) as _, TEST_SHARD, "host-a")
        .await
        .unwrap();
    let engine = ExecutionEngine::new(Arc::clone(&shard), Arc::clone(&store) as _);
    (store, shard, engine)
}
