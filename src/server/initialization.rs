// src/server/initialization.rs

//! Builds the shared engine state from the static configuration. This struct
//! is created once during startup and then consumed by the spawner.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

use crate::config::Config;
use crate::core::domain::DomainRegistry;
use crate::core::dynamicconfig::{Collection, InMemoryConfigSource};
use crate::core::membership::MembershipRing;
use crate::core::persistence::MemoryStore;
use crate::core::shard::ShardController;
use crate::core::tasks::scheduler::SchedulerDriver;
use crate::core::tasks::{PriorityTaskScheduler, RateLimiter, SequentialTaskQueues};

/// Contains all initialized components required to spawn the engine's
/// background tasks.
pub struct EngineContext {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub ring: Arc<MembershipRing>,
    pub controller: Arc<ShardController>,
    pub registry: Arc<DomainRegistry>,
    pub dynamic_config: Arc<Collection>,
    pub scheduler: Arc<PriorityTaskScheduler>,
    pub scheduler_driver: Option<SchedulerDriver>,
    pub sequential: Arc<SequentialTaskQueues>,
    pub host_limiter: Arc<RateLimiter>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}

pub fn setup(config: Config) -> Result<EngineContext> {
    config.validate()?;

    // The reference store. Deployments with external storage swap this for
    // a driver implementing the same traits.
    let store = Arc::new(MemoryStore::new());

    // A single-host ring until a membership provider feeds it.
    let ring = Arc::new(MembershipRing::new(vec![config.host_identity.clone()]));

    let controller = ShardController::new(
        config.host_identity.clone(),
        config.shard_count,
        Arc::clone(&store) as _,
        Arc::clone(&ring),
        config.history.shard_update_min_interval,
        config.history.shard_sync_min_interval,
    );

    let registry = DomainRegistry::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        config.cluster.clone(),
        config.domain.min_retention_days,
        config.domain.failover_cooldown,
        config.domain.cache_refresh_interval,
    );

    let dynamic_config = Collection::new(Arc::new(InMemoryConfigSource::new()));

    let (scheduler, scheduler_driver) = PriorityTaskScheduler::new(
        config.history.priority_weights.clone(),
        config.history.task_worker_count,
    );
    let sequential = SequentialTaskQueues::new(Arc::clone(&scheduler));
    let host_limiter = Arc::new(RateLimiter::new(
        config.history.host_rps,
        config.history.transfer_batch_size,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    info!(
        "Engine state initialized: {} shard(s), cluster '{}' (master '{}').",
        config.shard_count, config.cluster.current_cluster, config.cluster.master_cluster
    );

    Ok(EngineContext {
        config,
        store,
        ring,
        controller,
        registry,
        dynamic_config,
        scheduler,
        scheduler_driver: Some(scheduler_driver),
        sequential,
        host_limiter,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
