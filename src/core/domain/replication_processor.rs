// src/core/domain/replication_processor.rs

//! The per-remote-cluster domain replication processor: polls the source
//! cluster's admin endpoint, applies each message through a pluggable
//! executor with retry, and dead-letters messages that exhaust the budget.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::errors::WarpflowError;
use crate::core::membership::MembershipRing;
use crate::core::metrics;
use crate::core::persistence::store::{DomainReplicationQueue, DomainStore};
use crate::core::persistence::types::{
    DomainOperation, DomainRecord, DomainTaskAttributes, ReplicationQueueMessage,
};
use crate::core::tasks::backoff::{RetryPolicy, jit_duration};

/// Deadline for one poll of the remote admin endpoint.
const REMOTE_POLL_DEADLINE: Duration = Duration::from_secs(10);

/// Applies one domain replication task on the local cluster.
#[async_trait]
pub trait DomainReplicationTaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task: &DomainTaskAttributes) -> Result<(), WarpflowError>;
}

/// The admin surface of a remote cluster, as consumed by this processor.
#[async_trait]
pub trait RemoteReplicationClient: Send + Sync + 'static {
    async fn get_domain_replication_messages(
        &self,
        last_retrieved_message_id: i64,
        last_processed_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError>;
}

/// An in-process client over a source cluster's replication queue. Used in
/// tests and single-process deployments.
pub struct LocalReplicationClient {
    queue: Arc<dyn DomainReplicationQueue>,
    consumer_cluster: String,
}

impl LocalReplicationClient {
    pub fn new(queue: Arc<dyn DomainReplicationQueue>, consumer_cluster: impl Into<String>) -> Self {
        Self {
            queue,
            consumer_cluster: consumer_cluster.into(),
        }
    }
}

#[async_trait]
impl RemoteReplicationClient for LocalReplicationClient {
    async fn get_domain_replication_messages(
        &self,
        last_retrieved_message_id: i64,
        last_processed_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError> {
        self.queue
            .update_ack_level(&self.consumer_cluster, last_processed_message_id)
            .await?;
        self.queue
            .get_messages(last_retrieved_message_id, max_count)
            .await
    }
}

/// The default executor: installs domain changes into the local store,
/// guarded by failover/config versions so stale or re-delivered updates are
/// ignored rather than applied out of order.
pub struct DomainReplicationApplier {
    store: Arc<dyn DomainStore>,
}

impl DomainReplicationApplier {
    pub fn new(store: Arc<dyn DomainStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    fn record_from_task(task: &DomainTaskAttributes) -> DomainRecord {
        DomainRecord {
            info: task.info.clone(),
            config: task.config.clone(),
            replication_config: task.replication_config.clone(),
            is_global: true,
            config_version: task.config_version,
            failover_version: task.failover_version,
            previous_failover_version: task.previous_failover_version,
            failover_end_time: task.failover_end_time,
            last_updated_time: chrono::Utc::now(),
            notification_version: 0,
        }
    }
}

#[async_trait]
impl DomainReplicationTaskExecutor for DomainReplicationApplier {
    async fn execute(&self, task: &DomainTaskAttributes) -> Result<(), WarpflowError> {
        match task.operation {
            DomainOperation::Create => {
                match self.store.get_domain_by_name(&task.info.name).await {
                    // Re-delivered create; version guards make this a no-op.
                    Ok(_) => Ok(()),
                    Err(WarpflowError::EntityNotExists(_)) => {
                        self.store
                            .create_domain(Self::record_from_task(task))
                            .await
                            .map(|_| ())
                    }
                    Err(e) => Err(e),
                }
            }
            DomainOperation::Update => {
                let existing = match self.store.get_domain_by_name(&task.info.name).await {
                    Ok(record) => record,
                    Err(WarpflowError::EntityNotExists(_)) => {
                        // The create message was lost or is still in flight.
                        return self
                            .store
                            .create_domain(Self::record_from_task(task))
                            .await
                            .map(|_| ());
                    }
                    Err(e) => return Err(e),
                };
                if task.failover_version < existing.failover_version
                    || (task.failover_version == existing.failover_version
                        && task.config_version < existing.config_version)
                {
                    debug!(
                        "Ignoring stale replication update for domain '{}' \
                         (incoming failover version {} < stored {}).",
                        task.info.name, task.failover_version, existing.failover_version
                    );
                    return Ok(());
                }
                self.store.update_domain(Self::record_from_task(task)).await
            }
        }
    }
}

/// One processor per remote cluster. Only the host the source cluster's name
/// hashes to runs the poll; brief overlap during ring reconfiguration is
/// tolerated because applies are version-guarded.
pub struct DomainReplicationProcessor {
    source_cluster: String,
    host_identity: String,
    ring: Arc<MembershipRing>,
    client: Arc<dyn RemoteReplicationClient>,
    executor: Arc<dyn DomainReplicationTaskExecutor>,
    dlq: Arc<dyn DomainReplicationQueue>,
    last_processed_message_id: AtomicI64,
    last_retrieved_message_id: AtomicI64,
    poll_interval: Duration,
    poll_jitter_coefficient: f64,
    retry_policy: RetryPolicy,
    fetch_size: usize,
}

impl DomainReplicationProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_cluster: impl Into<String>,
        host_identity: impl Into<String>,
        ring: Arc<MembershipRing>,
        client: Arc<dyn RemoteReplicationClient>,
        executor: Arc<dyn DomainReplicationTaskExecutor>,
        dlq: Arc<dyn DomainReplicationQueue>,
        poll_interval: Duration,
        poll_jitter_coefficient: f64,
        retry_initial_interval: Duration,
        retry_expiration: Duration,
        fetch_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            source_cluster: source_cluster.into(),
            host_identity: host_identity.into(),
            ring,
            client,
            executor,
            dlq,
            last_processed_message_id: AtomicI64::new(0),
            last_retrieved_message_id: AtomicI64::new(0),
            poll_interval,
            poll_jitter_coefficient,
            retry_policy: RetryPolicy::new(retry_initial_interval)
                .with_expiration_interval(retry_expiration),
            fetch_size,
        })
    }

    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    pub fn last_processed_message_id(&self) -> i64 {
        self.last_processed_message_id.load(Ordering::Acquire)
    }

    /// One poll cycle. Skipped entirely when the ring assigns the source
    /// cluster to another host.
    pub async fn poll_once(&self) -> Result<(), WarpflowError> {
        if !self
            .ring
            .is_owned_by(&self.source_cluster, &self.host_identity)
        {
            return Ok(());
        }

        let last_retrieved = self.last_retrieved_message_id.load(Ordering::Acquire);
        let last_processed = self.last_processed_message_id.load(Ordering::Acquire);
        let messages = match tokio::time::timeout(
            REMOTE_POLL_DEADLINE,
            self.client.get_domain_replication_messages(
                last_retrieved,
                last_processed,
                self.fetch_size,
            ),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Polling domain replication messages from '{}' timed out.",
                    self.source_cluster
                );
                return Ok(());
            }
        };
        if messages.is_empty() {
            return Ok(());
        }

        let mut highest_id = last_retrieved;
        for message in messages {
            self.apply_with_retry(&message).await;
            highest_id = highest_id.max(message.message_id);
        }
        self.last_retrieved_message_id
            .store(highest_id, Ordering::Release);
        self.last_processed_message_id
            .store(highest_id, Ordering::Release);
        Ok(())
    }

    /// Applies one message, retrying transient failures with exponential
    /// backoff until the policy expires; terminal failures go to the DLQ.
    async fn apply_with_retry(&self, message: &ReplicationQueueMessage) {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match self.executor.execute(&message.payload).await {
                Ok(()) => return,
                Err(e @ WarpflowError::BadRequest(_)) => {
                    warn!(
                        "Domain replication message {} from '{}' rejected: {e}",
                        message.message_id, self.source_cluster
                    );
                    self.dead_letter(message).await;
                    return;
                }
                Err(e) => {
                    match self.retry_policy.next_delay(attempt, started.elapsed()) {
                        Some(delay) => {
                            attempt += 1;
                            debug!(
                                "Retrying domain replication message {} from '{}' \
                                 (attempt {attempt}): {e}",
                                message.message_id, self.source_cluster
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            warn!(
                                "Domain replication message {} from '{}' exhausted retries: {e}",
                                message.message_id, self.source_cluster
                            );
                            self.dead_letter(message).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Publishes the failed message to the per-source DLQ, retrying the
    /// publication itself with the same policy.
    async fn dead_letter(&self, message: &ReplicationQueueMessage) {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match self
                .dlq
                .publish_to_dlq(&self.source_cluster, message.clone())
                .await
            {
                Ok(()) => {
                    metrics::DOMAIN_REPLICATION_DLQ_TOTAL
                        .with_label_values(&[message.payload.info.name.as_str()])
                        .inc();
                    return;
                }
                Err(e) => match self.retry_policy.next_delay(attempt, started.elapsed()) {
                    Some(delay) => {
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "Dropping domain replication message {} from '{}': \
                             DLQ publication failed: {e}",
                            message.message_id, self.source_cluster
                        );
                        return;
                    }
                },
            }
        }
    }

    /// Operator surface: reads a page of dead-lettered messages.
    pub async fn read_dlq(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> Result<Vec<ReplicationQueueMessage>, WarpflowError> {
        self.dlq
            .get_dlq_messages(&self.source_cluster, last_message_id, max_count)
            .await
    }

    /// Operator surface: re-applies a range of dead-lettered messages
    /// through the executor, deleting each on success. Returns how many
    /// were merged; a message that fails again stays in the DLQ and stops
    /// the pass so ordering is preserved.
    pub async fn merge_dlq(
        &self,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<usize, WarpflowError> {
        let messages = self
            .dlq
            .get_dlq_messages(&self.source_cluster, exclusive_begin, usize::MAX)
            .await?;
        let mut merged = 0;
        for message in messages {
            if message.message_id > inclusive_end {
                break;
            }
            self.executor.execute(&message.payload).await?;
            self.dlq
                .delete_dlq_message(&self.source_cluster, message.message_id)
                .await?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Operator surface: drops a range of dead-lettered messages.
    pub async fn purge_dlq(
        &self,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<(), WarpflowError> {
        self.dlq
            .range_delete_dlq_messages(&self.source_cluster, exclusive_begin, inclusive_end)
            .await
    }

    /// Runs the poll loop on a 1-second cadence with 20% jitter (both
    /// configurable) until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Domain replication processor for '{}' started on {}.",
            self.source_cluster, self.host_identity
        );
        loop {
            let sleep = jit_duration(self.poll_interval, self.poll_jitter_coefficient);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {
                    if let Err(e) = self.poll_once().await {
                        warn!(
                            "Domain replication poll against '{}' failed: {e}",
                            self.source_cluster
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(
                        "Domain replication processor for '{}' shutting down.",
                        self.source_cluster
                    );
                    return;
                }
            }
        }
    }
}
