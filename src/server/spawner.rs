// src/server/spawner.rs

//! Spawns all of the engine's long-running background tasks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::initialization::EngineContext;
use crate::core::domain::{
    DomainReplicationApplier, DomainReplicationProcessor, FailoverWatchdog,
    LocalReplicationClient,
};
use crate::core::queues::timer::NoopTimerTaskHandler;
use crate::core::queues::transfer::NoopTransferTaskHandler;
use crate::core::queues::{QueueProcessor, TimerTaskSource, TransferTaskSource};
use crate::core::types::ShardId;

/// How often the processor manager checks for newly acquired shards.
const SHARD_PROCESSOR_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Interval at which the failover watchdog scans for expired graceful
/// failovers.
const FAILOVER_SCAN_INTERVAL: Duration = Duration::from_secs(1);

pub fn spawn_all(ctx: &mut EngineContext) {
    // --- Priority scheduler worker pool ---
    let driver = ctx
        .scheduler_driver
        .take()
        .expect("scheduler driver spawned once");
    ctx.background_tasks
        .spawn(driver.run(ctx.shutdown_tx.subscribe()));

    // --- Shard controller ---
    ctx.background_tasks
        .spawn(Arc::clone(&ctx.controller).run(ctx.shutdown_tx.subscribe()));

    // --- Domain registry cache refresher ---
    ctx.background_tasks
        .spawn(Arc::clone(&ctx.registry).run(ctx.shutdown_tx.subscribe()));

    // --- Failover watchdog ---
    let watchdog = FailoverWatchdog::new(Arc::clone(&ctx.registry), FAILOVER_SCAN_INTERVAL);
    ctx.background_tasks
        .spawn(watchdog.run(ctx.shutdown_tx.subscribe()));

    // --- Domain replication processors, one per remote cluster ---
    // The in-process client stands in for the remote admin endpoint;
    // cross-process deployments plug an RPC-backed client here.
    let applier = DomainReplicationApplier::new(Arc::clone(&ctx.store) as _);
    for cluster in &ctx.config.cluster.clusters {
        if cluster.name == ctx.config.cluster.current_cluster {
            continue;
        }
        let client = Arc::new(LocalReplicationClient::new(
            Arc::clone(&ctx.store) as _,
            ctx.config.cluster.current_cluster.clone(),
        ));
        let processor = DomainReplicationProcessor::new(
            cluster.name.clone(),
            ctx.config.host_identity.clone(),
            Arc::clone(&ctx.ring),
            client,
            Arc::clone(&applier) as _,
            Arc::clone(&ctx.store) as _,
            ctx.config.replication.poll_interval,
            ctx.config.replication.poll_jitter_coefficient,
            ctx.config.replication.retry_initial_interval,
            ctx.config.replication.retry_expiration,
            ctx.config.replication.fetch_size,
        );
        ctx.background_tasks
            .spawn(processor.run(ctx.shutdown_tx.subscribe()));
    }

    // --- Per-shard queue processors ---
    spawn_shard_processor_manager(ctx);

    info!("All background tasks spawned.");
}

/// Watches the controller for newly acquired shards and starts transfer and
/// timer processors for each. Processors exit on their own when the shard is
/// quarantined; the manager restarts them after re-acquisition.
fn spawn_shard_processor_manager(ctx: &mut EngineContext) {
    let controller = Arc::clone(&ctx.controller);
    let store = Arc::clone(&ctx.store);
    let sequential = Arc::clone(&ctx.sequential);
    let host_limiter = Arc::clone(&ctx.host_limiter);
    let dynamic_config = Arc::clone(&ctx.dynamic_config);
    let config = ctx.config.clone();
    let shutdown_tx = ctx.shutdown_tx.clone();
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();

    ctx.background_tasks.spawn(async move {
        let mut running: HashSet<ShardId> = HashSet::new();
        let mut interval = tokio::time::interval(SHARD_PROCESSOR_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for shard in controller.owned_shards() {
                        if shard.is_quarantined() {
                            running.remove(&shard.shard_id());
                            continue;
                        }
                        if !running.insert(shard.shard_id()) {
                            continue;
                        }
                        let transfer_source = TransferTaskSource::new(
                            Arc::clone(&shard),
                            Arc::clone(&store) as _,
                            Arc::new(NoopTransferTaskHandler),
                            config.cluster.current_cluster.clone(),
                        );
                        let transfer = QueueProcessor::new(
                            transfer_source,
                            Arc::clone(&shard),
                            Arc::clone(&sequential),
                            Arc::clone(&host_limiter),
                            config.history.shard_rps,
                            config.history.transfer_batch_size,
                            config.history.poll_backoff_interval,
                            &dynamic_config,
                        );
                        tokio::spawn(transfer.run(shutdown_tx.subscribe()));

                        let timer_source = TimerTaskSource::new(
                            Arc::clone(&shard),
                            Arc::clone(&store) as _,
                            Arc::new(NoopTimerTaskHandler),
                            config.cluster.current_cluster.clone(),
                            config.history.timer_processor_max_time_shift,
                            &dynamic_config,
                        );
                        let timer = QueueProcessor::new(
                            timer_source,
                            Arc::clone(&shard),
                            Arc::clone(&sequential),
                            Arc::clone(&host_limiter),
                            config.history.shard_rps,
                            config.history.timer_batch_size,
                            config.history.poll_backoff_interval,
                            &dynamic_config,
                        );
                        tokio::spawn(timer.run(shutdown_tx.subscribe()));
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    });
}
