// src/core/shard/controller.rs

//! The shard controller: owns the local set of shards based on the
//! membership ring, re-acquires on ring changes, and periodically persists
//! shard records (ack levels, processing-queue states) with jitter.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::membership::MembershipRing;
use crate::core::metrics;
use crate::core::persistence::store::ShardStore;
use crate::core::tasks::backoff::jit_duration;
use crate::core::types::ShardId;

use super::context::ShardContext;

/// Jitter applied to the periodic sync interval so hosts do not stampede
/// the store in lockstep.
const SYNC_JITTER_COEFFICIENT: f64 = 0.1;

fn shard_ring_key(shard_id: ShardId) -> String {
    format!("shard-{shard_id}")
}

pub struct ShardController {
    host_identity: String,
    shard_count: u32,
    store: Arc<dyn ShardStore>,
    ring: Arc<MembershipRing>,
    shards: DashMap<ShardId, Arc<ShardContext>>,
    /// Cadence of local ack-level persistence.
    update_interval: Duration,
    /// Cadence of the jittered cross-region ack sync.
    sync_interval: Duration,
}

impl ShardController {
    pub fn new(
        host_identity: impl Into<String>,
        shard_count: u32,
        store: Arc<dyn ShardStore>,
        ring: Arc<MembershipRing>,
        update_interval: Duration,
        sync_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            host_identity: host_identity.into(),
            shard_count,
            store,
            ring,
            shards: DashMap::new(),
            update_interval,
            sync_interval,
        })
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<Arc<ShardContext>> {
        self.shards.get(&shard_id).map(|entry| Arc::clone(&entry))
    }

    pub fn owned_shards(&self) -> Vec<Arc<ShardContext>> {
        self.shards.iter().map(|entry| Arc::clone(&entry)).collect()
    }

    /// The shard a workflow hashes to.
    pub fn shard_for_workflow(&self, domain_id: &str, workflow_id: &str) -> ShardId {
        let key = format!("{domain_id}:{workflow_id}");
        let hash =
            murmur3::murmur3_32(&mut std::io::Cursor::new(key.as_bytes()), 0).unwrap_or_default();
        hash % self.shard_count
    }

    /// Acquires every shard the ring assigns to this host and relinquishes
    /// the rest. Quarantined contexts are dropped so a later pass can
    /// re-acquire them cleanly.
    pub async fn rebalance(&self) {
        for shard_id in 0..self.shard_count {
            let assigned_here = self
                .ring
                .is_owned_by(&shard_ring_key(shard_id), &self.host_identity);
            let held = self.shards.get(&shard_id).map(|c| Arc::clone(&c));

            match (assigned_here, held) {
                (true, Some(context)) if context.is_quarantined() => {
                    self.shards.remove(&shard_id);
                    self.acquire_shard(shard_id).await;
                }
                (true, None) => self.acquire_shard(shard_id).await,
                (false, Some(_)) => {
                    self.shards.remove(&shard_id);
                    info!("Relinquished shard {shard_id}; ring moved it elsewhere.");
                }
                _ => {}
            }
        }
        metrics::OWNED_SHARDS.set(self.shards.len() as f64);
    }

    async fn acquire_shard(&self, shard_id: ShardId) {
        match ShardContext::acquire(
            Arc::clone(&self.store),
            shard_id,
            self.host_identity.clone(),
        )
        .await
        {
            Ok(context) => {
                self.shards.insert(shard_id, context);
            }
            Err(e) => {
                warn!("Failed to acquire shard {shard_id}: {e}");
            }
        }
    }

    /// Runs the controller loop: rebalances on ring changes, persists ack
    /// levels on the update cadence, and runs the jittered cross-region sync
    /// on the sync cadence.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ring_rx = self.ring.subscribe();
        self.rebalance().await;
        let mut update_interval = tokio::time::interval(self.update_interval);
        update_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let sync_sleep = jit_duration(self.sync_interval, SYNC_JITTER_COEFFICIENT);
            tokio::select! {
                changed = ring_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!("Membership changed; rebalancing shards.");
                    self.rebalance().await;
                }
                _ = update_interval.tick() => {
                    self.sync_owned_shards().await;
                }
                _ = tokio::time::sleep(sync_sleep) => {
                    self.sync_owned_shards().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shard controller shutting down; releasing {} shard(s).", self.shards.len());
                    self.shards.clear();
                    return;
                }
            }
        }
    }

    async fn sync_owned_shards(&self) {
        // Collect handles first; persisting awaits and must not hold any
        // map guard.
        for context in self.owned_shards() {
            if context.is_quarantined() {
                continue;
            }
            if let Err(e) = context.persist().await {
                warn!("Failed to sync shard {}: {e}", context.shard_id());
            }
        }
    }
}

impl std::fmt::Debug for ShardController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardController")
            .field("host_identity", &self.host_identity)
            .field("shard_count", &self.shard_count)
            .field("owned", &self.shards.len())
            .finish()
    }
}
