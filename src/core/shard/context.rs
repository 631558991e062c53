// src/core/shard/context.rs

//! The per-shard context: RangeID lease, ack-level bookkeeping, processing
//! queue states, and the monotonic task-ID allocator.
//!
//! Task IDs are drawn from pre-reserved blocks prefixed by the RangeID
//! (`range_id << TASK_ID_BLOCK_BITS`), so IDs stay monotonic across
//! ownership changes without coordinating every allocation. When a block
//! exhausts, the shard bumps its RangeID through a CAS update; a CAS miss
//! means another host took the shard, and this context quarantines itself:
//! every further write fails fast with `ShardOwnershipLost`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::errors::WarpflowError;
use crate::core::metrics;
use crate::core::persistence::store::ShardStore;
use crate::core::persistence::types::{ProcessingQueueState, ShardInfo};
use crate::core::types::{ShardId, TaskId};

/// Bits reserved for the per-range sequence number inside a task ID.
const TASK_ID_BLOCK_BITS: u32 = 24;

struct ShardState {
    info: ShardInfo,
    /// Next task ID to hand out.
    task_sequence: TaskId,
    /// Exclusive upper bound of the reserved block.
    max_task_sequence: TaskId,
}

/// A point-in-time operational summary of one shard, surfaced through the
/// admin describe path.
#[derive(Debug, Clone)]
pub struct ShardStats {
    pub shard_id: ShardId,
    pub owner: String,
    pub range_id: i64,
    pub quarantined: bool,
    pub transfer_ack_level: TaskId,
    pub timer_ack_level: DateTime<Utc>,
    pub replication_ack_level: TaskId,
    pub max_task_id: TaskId,
}

/// A handle to one owned shard. Cloned freely across the engine and queue
/// processors; all mutation goes through the internal lock.
pub struct ShardContext {
    shard_id: ShardId,
    owner: String,
    store: Arc<dyn ShardStore>,
    state: Mutex<ShardState>,
    quarantined: AtomicBool,
}

impl ShardContext {
    /// Claims ownership of `shard_id` for `owner`: reads (or creates) the
    /// shard record, bumps its RangeID via CAS, and installs the context.
    pub async fn acquire(
        store: Arc<dyn ShardStore>,
        shard_id: ShardId,
        owner: impl Into<String>,
    ) -> Result<Arc<Self>, WarpflowError> {
        let owner = owner.into();
        let mut shard_info = match store.get_shard(shard_id).await {
            Ok(info) => info,
            Err(WarpflowError::EntityNotExists(_)) => {
                let info = ShardInfo::new(shard_id, owner.clone());
                store.create_shard(info.clone()).await?;
                info
            }
            Err(e) => return Err(e),
        };

        let previous_range_id = shard_info.range_id;
        if shard_info.owner != owner {
            shard_info.stolen_since_renew += 1;
        }
        shard_info.range_id += 1;
        shard_info.owner = owner.clone();
        shard_info.updated_at = Utc::now();
        store.update_shard(shard_info.clone(), previous_range_id).await?;

        metrics::SHARD_ACQUISITIONS_TOTAL.inc();
        info!(
            "Acquired shard {} with range ID {} for {}.",
            shard_id, shard_info.range_id, owner
        );

        let range_id = shard_info.range_id;
        Ok(Arc::new(Self {
            shard_id,
            owner,
            store,
            state: Mutex::new(ShardState {
                info: shard_info,
                task_sequence: range_id << TASK_ID_BLOCK_BITS,
                max_task_sequence: (range_id + 1) << TASK_ID_BLOCK_BITS,
            }),
            quarantined: AtomicBool::new(false),
        }))
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::Acquire)
    }

    /// Marks the shard unusable after an observed ownership loss. Pending
    /// writes fail fast until the controller re-acquires.
    pub fn quarantine(&self) {
        if !self.quarantined.swap(true, Ordering::AcqRel) {
            metrics::SHARD_OWNERSHIP_LOST_TOTAL.inc();
            warn!(
                "Shard {} lost ownership; failing fast until re-acquired.",
                self.shard_id
            );
        }
    }

    fn check_usable(&self) -> Result<(), WarpflowError> {
        if self.is_quarantined() {
            return Err(WarpflowError::ShardOwnershipLost {
                shard_id: self.shard_id,
                owner: self.owner.clone(),
            });
        }
        Ok(())
    }

    /// Inspects an operation outcome and quarantines on ownership loss.
    pub fn handle_error(&self, error: &WarpflowError) {
        if matches!(error, WarpflowError::ShardOwnershipLost { .. }) {
            self.quarantine();
        }
    }

    pub async fn range_id(&self) -> i64 {
        self.state.lock().await.info.range_id
    }

    /// Allocates `count` monotonic task IDs, renewing the reserved block
    /// (and the RangeID lease) when exhausted.
    pub async fn allocate_task_ids(&self, count: usize) -> Result<Vec<TaskId>, WarpflowError> {
        self.check_usable()?;
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            if state.task_sequence >= state.max_task_sequence {
                self.renew_range(&mut state).await?;
            }
            ids.push(state.task_sequence);
            state.task_sequence += 1;
        }
        Ok(ids)
    }

    pub async fn allocate_task_id(&self) -> Result<TaskId, WarpflowError> {
        Ok(self.allocate_task_ids(1).await?[0])
    }

    /// The highest task ID this shard may have handed out; queue read
    /// windows are capped at this level.
    pub async fn transfer_max_read_level(&self) -> TaskId {
        self.state.lock().await.task_sequence
    }

    async fn renew_range(&self, state: &mut ShardState) -> Result<(), WarpflowError> {
        let previous_range_id = state.info.range_id;
        state.info.range_id += 1;
        state.info.updated_at = Utc::now();
        match self
            .store
            .update_shard(state.info.clone(), previous_range_id)
            .await
        {
            Ok(()) => {
                state.task_sequence = state.info.range_id << TASK_ID_BLOCK_BITS;
                state.max_task_sequence = (state.info.range_id + 1) << TASK_ID_BLOCK_BITS;
                info!(
                    "Shard {} renewed task ID block at range ID {}.",
                    self.shard_id, state.info.range_id
                );
                Ok(())
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// A point-in-time copy of the durable shard image.
    pub async fn shard_info(&self) -> ShardInfo {
        self.state.lock().await.info.clone()
    }

    /// An operational snapshot for the admin describe surface.
    pub async fn stats(&self) -> ShardStats {
        let state = self.state.lock().await;
        ShardStats {
            shard_id: self.shard_id,
            owner: self.owner.clone(),
            range_id: state.info.range_id,
            quarantined: self.is_quarantined(),
            transfer_ack_level: state.info.transfer_ack_level,
            timer_ack_level: state.info.timer_ack_level,
            replication_ack_level: state.info.replication_ack_level,
            max_task_id: state.task_sequence,
        }
    }

    pub async fn transfer_ack_level(&self) -> TaskId {
        self.state.lock().await.info.transfer_ack_level
    }

    /// Advances the shard-wide transfer ack level. Levels never regress.
    pub async fn update_transfer_ack_level(&self, level: TaskId) {
        let mut state = self.state.lock().await;
        if level > state.info.transfer_ack_level {
            state.info.transfer_ack_level = level;
        }
    }

    pub async fn update_cluster_transfer_ack_level(&self, cluster: &str, level: TaskId) {
        let mut state = self.state.lock().await;
        let entry = state
            .info
            .cluster_transfer_ack_level
            .entry(cluster.to_string())
            .or_insert(0);
        if level > *entry {
            *entry = level;
        }
    }

    pub async fn timer_ack_level(&self) -> DateTime<Utc> {
        self.state.lock().await.info.timer_ack_level
    }

    pub async fn update_timer_ack_level(&self, level: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if level > state.info.timer_ack_level {
            state.info.timer_ack_level = level;
        }
    }

    pub async fn update_cluster_timer_ack_level(&self, cluster: &str, level: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let entry = state
            .info
            .cluster_timer_ack_level
            .entry(cluster.to_string())
            .or_insert(DateTime::<Utc>::UNIX_EPOCH);
        if level > *entry {
            *entry = level;
        }
    }

    pub async fn replication_ack_level(&self) -> TaskId {
        self.state.lock().await.info.replication_ack_level
    }

    pub async fn update_replication_ack_level(&self, level: TaskId) {
        let mut state = self.state.lock().await;
        if level > state.info.replication_ack_level {
            state.info.replication_ack_level = level;
        }
    }

    pub async fn cluster_replication_level(&self, cluster: &str) -> TaskId {
        self.state
            .lock()
            .await
            .info
            .cluster_replication_level
            .get(cluster)
            .copied()
            .unwrap_or(0)
    }

    pub async fn update_cluster_replication_level(&self, cluster: &str, level: TaskId) {
        let mut state = self.state.lock().await;
        let entry = state
            .info
            .cluster_replication_level
            .entry(cluster.to_string())
            .or_insert(0);
        if level > *entry {
            *entry = level;
        }
    }

    pub async fn replication_dlq_ack_level(&self, source_cluster: &str) -> TaskId {
        self.state
            .lock()
            .await
            .info
            .replication_dlq_ack_level
            .get(source_cluster)
            .copied()
            .unwrap_or(0)
    }

    pub async fn update_replication_dlq_ack_level(&self, source_cluster: &str, level: TaskId) {
        let mut state = self.state.lock().await;
        let entry = state
            .info
            .replication_dlq_ack_level
            .entry(source_cluster.to_string())
            .or_insert(0);
        if level > *entry {
            *entry = level;
        }
    }

    pub async fn domain_notification_version(&self) -> i64 {
        self.state.lock().await.info.domain_notification_version
    }

    pub async fn update_domain_notification_version(&self, version: i64) {
        let mut state = self.state.lock().await;
        if version > state.info.domain_notification_version {
            state.info.domain_notification_version = version;
        }
    }

    pub async fn transfer_processing_queue_states(
        &self,
        cluster: &str,
    ) -> Vec<ProcessingQueueState> {
        self.state
            .lock()
            .await
            .info
            .transfer_processing_queue_states
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn update_transfer_processing_queue_states(
        &self,
        cluster: &str,
        states: Vec<ProcessingQueueState>,
    ) {
        self.state
            .lock()
            .await
            .info
            .transfer_processing_queue_states
            .insert(cluster.to_string(), states);
    }

    pub async fn timer_processing_queue_states(&self, cluster: &str) -> Vec<ProcessingQueueState> {
        self.state
            .lock()
            .await
            .info
            .timer_processing_queue_states
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn update_timer_processing_queue_states(
        &self,
        cluster: &str,
        states: Vec<ProcessingQueueState>,
    ) {
        self.state
            .lock()
            .await
            .info
            .timer_processing_queue_states
            .insert(cluster.to_string(), states);
    }

    /// Persists the shard record under the current lease. A CAS miss
    /// quarantines the shard.
    pub async fn persist(&self) -> Result<(), WarpflowError> {
        self.check_usable()?;
        let info = {
            let mut state = self.state.lock().await;
            state.info.updated_at = Utc::now();
            state.info.clone()
        };
        match self.store.update_shard(info.clone(), info.range_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardContext")
            .field("shard_id", &self.shard_id)
            .field("owner", &self.owner)
            .field("quarantined", &self.is_quarantined())
            .finish()
    }
}
