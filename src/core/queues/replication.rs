// src/core/queues/replication.rs

//! The replication stream of one shard: serves `GetReplicationMessages` to
//! pull-based consumers on remote clusters, publishes failover markers, and
//! prunes tasks every remote cluster has consumed. The per-source history
//! DLQ lives here too.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::errors::WarpflowError;
use crate::core::persistence::store::ExecutionStore;
use crate::core::persistence::types::{ReplicationTask, ReplicationTaskAttributes};
use crate::core::shard::ShardContext;
use crate::core::types::{TaskId, Version};

/// The replication processor of one shard.
pub struct ReplicationQueueProcessor {
    shard: Arc<ShardContext>,
    store: Arc<dyn ExecutionStore>,
    /// Remote clusters that consume this shard's stream; pruning follows the
    /// slowest of them.
    remote_clusters: Vec<String>,
    batch_size: usize,
    /// Failover markers are not tied to an execution row; they ride along in
    /// `GetReplicationMessages` responses until every consumer passes them.
    pending_markers: Mutex<BTreeMap<TaskId, ReplicationTask>>,
}

impl ReplicationQueueProcessor {
    pub fn new(
        shard: Arc<ShardContext>,
        store: Arc<dyn ExecutionStore>,
        remote_clusters: Vec<String>,
        batch_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            shard,
            store,
            remote_clusters,
            batch_size,
            pending_markers: Mutex::new(BTreeMap::new()),
        })
    }

    /// Serves one page of the stream to `cluster`. `last_retrieved_id` is the
    /// consumer's cursor; when absent, the shard's stored level for the
    /// cluster is used. Returns the tasks and the new cursor.
    pub async fn get_replication_messages(
        &self,
        cluster: &str,
        last_retrieved_id: Option<TaskId>,
    ) -> Result<(Vec<ReplicationTask>, TaskId), WarpflowError> {
        let read_level = match last_retrieved_id {
            Some(id) => id,
            None => self.shard.cluster_replication_level(cluster).await,
        };
        let max_read_level = self.shard.transfer_max_read_level().await;
        let mut tasks = self
            .store
            .get_replication_tasks(self.shard.shard_id(), read_level, max_read_level, self.batch_size)
            .await?;

        // Interleave pending failover markers in task-ID order.
        if read_level < max_read_level {
            let markers = self.pending_markers.lock();
            for (_, marker) in markers.range((read_level + 1)..=max_read_level) {
                tasks.push(marker.clone());
            }
        }
        tasks.sort_by_key(|task| task.task_id);
        tasks.truncate(self.batch_size);

        let new_cursor = tasks.last().map(|t| t.task_id).unwrap_or(read_level);
        self.shard
            .update_cluster_replication_level(cluster, new_cursor)
            .await;
        self.prune_consumed().await?;
        Ok((tasks, new_cursor))
    }

    /// Publishes a failover marker onto the stream.
    pub async fn publish_failover_marker(
        &self,
        domain_id: impl Into<String>,
        version: Version,
    ) -> Result<TaskId, WarpflowError> {
        let task_id = self.shard.allocate_task_id().await?;
        let marker = ReplicationTask {
            task_id,
            creation_time: Utc::now(),
            attributes: ReplicationTaskAttributes::FailoverMarker {
                domain_id: domain_id.into(),
                version,
            },
        };
        self.pending_markers.lock().insert(task_id, marker);
        info!(
            "Published failover marker at task {} on shard {}.",
            task_id,
            self.shard.shard_id()
        );
        Ok(task_id)
    }

    /// Deletes tasks every remote cluster has consumed and advances the
    /// shard's replication ack level to match.
    async fn prune_consumed(&self) -> Result<(), WarpflowError> {
        if self.remote_clusters.is_empty() {
            return Ok(());
        }
        let mut min_level = TaskId::MAX;
        for cluster in &self.remote_clusters {
            min_level = min_level.min(self.shard.cluster_replication_level(cluster).await);
        }
        if min_level == TaskId::MAX || min_level <= self.shard.replication_ack_level().await {
            return Ok(());
        }
        self.store
            .range_complete_replication_task(self.shard.shard_id(), min_level)
            .await?;
        self.pending_markers.lock().retain(|task_id, _| *task_id > min_level);
        self.shard.update_replication_ack_level(min_level).await;
        debug!(
            "Pruned replication tasks up to {} on shard {}.",
            min_level,
            self.shard.shard_id()
        );
        Ok(())
    }

    // --- Per-source history DLQ (operator surface) ---

    pub async fn put_dlq_task(
        &self,
        source_cluster: &str,
        task: ReplicationTask,
    ) -> Result<(), WarpflowError> {
        self.store
            .put_replication_task_to_dlq(self.shard.shard_id(), source_cluster, task)
            .await
    }

    pub async fn read_dlq_tasks(
        &self,
        source_cluster: &str,
        batch_size: usize,
    ) -> Result<Vec<ReplicationTask>, WarpflowError> {
        let ack_level = self.shard.replication_dlq_ack_level(source_cluster).await;
        self.store
            .get_replication_tasks_from_dlq(
                self.shard.shard_id(),
                source_cluster,
                ack_level,
                TaskId::MAX,
                batch_size,
            )
            .await
    }

    pub async fn dlq_size(&self, source_cluster: &str) -> Result<usize, WarpflowError> {
        self.store
            .get_replication_dlq_size(self.shard.shard_id(), source_cluster)
            .await
    }

    /// Removes a range of DLQ tasks and returns them so the caller can
    /// re-apply each through its replication executor.
    pub async fn merge_dlq_tasks(
        &self,
        source_cluster: &str,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<Vec<ReplicationTask>, WarpflowError> {
        let tasks = self
            .store
            .get_replication_tasks_from_dlq(
                self.shard.shard_id(),
                source_cluster,
                exclusive_begin,
                inclusive_end,
                usize::MAX,
            )
            .await?;
        self.store
            .range_delete_replication_task_from_dlq(
                self.shard.shard_id(),
                source_cluster,
                exclusive_begin,
                inclusive_end,
            )
            .await?;
        self.shard
            .update_replication_dlq_ack_level(source_cluster, inclusive_end)
            .await;
        Ok(tasks)
    }

    pub async fn purge_dlq_tasks(
        &self,
        source_cluster: &str,
        exclusive_begin: TaskId,
        inclusive_end: TaskId,
    ) -> Result<(), WarpflowError> {
        self.store
            .range_delete_replication_task_from_dlq(
                self.shard.shard_id(),
                source_cluster,
                exclusive_begin,
                inclusive_end,
            )
            .await?;
        self.shard
            .update_replication_dlq_ack_level(source_cluster, inclusive_end)
            .await;
        Ok(())
    }
}
