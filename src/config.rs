// src/config.rs

//! Manages engine configuration: loading, defaults, and validation.
//!
//! This is the *static* configuration read once at startup. Limits that must
//! react to operator changes at runtime live in `core::dynamicconfig`.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::core::types::{EMPTY_VERSION, Version};

/// Identity and failover-version seed of one cluster in the replication group.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterEntry {
    /// Unique cluster name, e.g. "us-east-1".
    pub name: String,
    /// The starting failover version for domains whose active cluster is this
    /// one. Must be unique per cluster and below the version increment.
    pub initial_failover_version: Version,
    /// Address of the cluster's admin endpoint, used by the domain
    /// replication processor to pull messages.
    #[serde(default)]
    pub rpc_address: String,
}

/// Describes the replication group this host participates in.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// The name of the cluster this host runs in.
    pub current_cluster: String,
    /// The cluster allowed to register and mutate global domains.
    pub master_cluster: String,
    /// The spacing between failover versions minted for different clusters.
    #[serde(default = "default_failover_version_increment")]
    pub failover_version_increment: Version,
    /// All clusters in the group, including the current one.
    pub clusters: Vec<ClusterEntry>,
}

impl ClusterConfig {
    /// Whether this host runs in the master cluster for global-domain writes.
    pub fn is_master_cluster(&self) -> bool {
        self.current_cluster == self.master_cluster
    }

    pub fn contains_cluster(&self, name: &str) -> bool {
        self.clusters.iter().any(|c| c.name == name)
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.name.clone()).collect()
    }

    pub fn initial_failover_version(&self, cluster: &str) -> Option<Version> {
        self.clusters
            .iter()
            .find(|c| c.name == cluster)
            .map(|c| c.initial_failover_version)
    }

    /// Mints the next failover version for `cluster`, strictly greater than
    /// `current_version`. Versions are congruent to the cluster's initial
    /// version modulo the increment, so any version maps back to the cluster
    /// that minted it.
    pub fn next_failover_version(&self, cluster: &str, current_version: Version) -> Version {
        let initial = self
            .initial_failover_version(cluster)
            .unwrap_or(EMPTY_VERSION);
        if initial == EMPTY_VERSION {
            return EMPTY_VERSION;
        }
        let increment = self.failover_version_increment;
        let current = if current_version == EMPTY_VERSION {
            0
        } else {
            current_version
        };
        let mut version = (current / increment) * increment + initial;
        if version <= current {
            version += increment;
        }
        version
    }

    /// Maps a failover version back to the cluster that minted it.
    pub fn cluster_for_version(&self, version: Version) -> Option<&ClusterEntry> {
        if version == EMPTY_VERSION {
            return None;
        }
        let remainder = version % self.failover_version_increment;
        self.clusters
            .iter()
            .find(|c| c.initial_failover_version == remainder)
    }
}

/// Tuning for the shard controller and the per-shard queue processors.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryConfig {
    /// Minimum interval between persisted shard-record updates.
    #[serde(with = "humantime_serde", default = "default_shard_update_min_interval")]
    pub shard_update_min_interval: Duration,
    /// Minimum interval between cross-region ack-level syncs; jitter is added.
    #[serde(with = "humantime_serde", default = "default_shard_sync_min_interval")]
    pub shard_sync_min_interval: Duration,
    /// How far past now the timer processor may read.
    #[serde(with = "humantime_serde", default = "default_timer_max_time_shift")]
    pub timer_processor_max_time_shift: Duration,
    /// Backoff applied when a queue poll is throttled; jitter is added.
    #[serde(with = "humantime_serde", default = "default_poll_backoff_interval")]
    pub poll_backoff_interval: Duration,
    /// Number of workers in the shared priority task pool.
    #[serde(default = "default_task_worker_count")]
    pub task_worker_count: usize,
    /// Round-robin weights per priority class, highest priority first.
    #[serde(default = "default_priority_weights")]
    pub priority_weights: Vec<usize>,
    /// Page size for transfer-queue reads.
    #[serde(default = "default_queue_batch_size")]
    pub transfer_batch_size: usize,
    /// Page size for timer-queue reads.
    #[serde(default = "default_queue_batch_size")]
    pub timer_batch_size: usize,
    /// Page size for replication-stream reads.
    #[serde(default = "default_queue_batch_size")]
    pub replication_batch_size: usize,
    /// Per-host queue read rate (tasks per second).
    #[serde(default = "default_host_rps")]
    pub host_rps: f64,
    /// Per-shard queue read rate (tasks per second).
    #[serde(default = "default_shard_rps")]
    pub shard_rps: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            shard_update_min_interval: default_shard_update_min_interval(),
            shard_sync_min_interval: default_shard_sync_min_interval(),
            timer_processor_max_time_shift: default_timer_max_time_shift(),
            poll_backoff_interval: default_poll_backoff_interval(),
            task_worker_count: default_task_worker_count(),
            priority_weights: default_priority_weights(),
            transfer_batch_size: default_queue_batch_size(),
            timer_batch_size: default_queue_batch_size(),
            replication_batch_size: default_queue_batch_size(),
            host_rps: default_host_rps(),
            shard_rps: default_shard_rps(),
        }
    }
}

/// Tuning for the domain registry and failover rules.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DomainConfig {
    /// Minimum allowed retention, in days.
    #[serde(default = "default_min_retention_days")]
    pub min_retention_days: i32,
    /// Minimum interval between failovers of the same domain.
    #[serde(with = "humantime_serde", default = "default_failover_cooldown")]
    pub failover_cooldown: Duration,
    /// Interval at which the registry cache is refreshed from the store.
    #[serde(with = "humantime_serde", default = "default_cache_refresh_interval")]
    pub cache_refresh_interval: Duration,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            min_retention_days: default_min_retention_days(),
            failover_cooldown: default_failover_cooldown(),
            cache_refresh_interval: default_cache_refresh_interval(),
        }
    }
}

/// Tuning for the domain replication processors.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    /// Base poll cadence against each remote cluster.
    #[serde(with = "humantime_serde", default = "default_replication_poll_interval")]
    pub poll_interval: Duration,
    /// Symmetric jitter applied to the poll cadence (fraction of the base).
    #[serde(default = "default_poll_jitter_coefficient")]
    pub poll_jitter_coefficient: f64,
    /// Initial backoff for applying a replication task.
    #[serde(with = "humantime_serde", default = "default_replication_retry_initial")]
    pub retry_initial_interval: Duration,
    /// Total time budget for retrying one replication task before it is
    /// dead-lettered.
    #[serde(with = "humantime_serde", default = "default_replication_retry_expiration")]
    pub retry_expiration: Duration,
    /// Maximum number of messages fetched per poll.
    #[serde(default = "default_replication_fetch_size")]
    pub fetch_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_replication_poll_interval(),
            poll_jitter_coefficient: default_poll_jitter_coefficient(),
            retry_initial_interval: default_replication_retry_initial(),
            retry_expiration: default_replication_retry_expiration(),
            fetch_size: default_replication_fetch_size(),
        }
    }
}

fn default_failover_version_increment() -> Version {
    10
}
fn default_shard_update_min_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_shard_sync_min_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_timer_max_time_shift() -> Duration {
    Duration::from_secs(1)
}
fn default_poll_backoff_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_task_worker_count() -> usize {
    64
}
fn default_priority_weights() -> Vec<usize> {
    vec![5, 2, 1]
}
fn default_queue_batch_size() -> usize {
    100
}
fn default_host_rps() -> f64 {
    1000.0
}
fn default_shard_rps() -> f64 {
    100.0
}
fn default_min_retention_days() -> i32 {
    1
}
fn default_failover_cooldown() -> Duration {
    Duration::from_secs(60)
}
fn default_cache_refresh_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_replication_poll_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_poll_jitter_coefficient() -> f64 {
    0.2
}
fn default_replication_retry_initial() -> Duration {
    Duration::from_secs(1)
}
fn default_replication_retry_expiration() -> Duration {
    Duration::from_secs(30)
}
fn default_replication_fetch_size() -> usize {
    100
}
fn default_shard_count() -> u32 {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The complete static configuration of a Warpflow host.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Host identity used by the membership ring and shard ownership records.
    pub host_identity: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Total number of shards in the cluster. Fixed for the cluster lifetime.
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_identity.is_empty() {
            return Err(anyhow!("host_identity must not be empty"));
        }
        if self.shard_count == 0 {
            return Err(anyhow!("shard_count must be greater than zero"));
        }
        if self.cluster.clusters.is_empty() {
            return Err(anyhow!("cluster.clusters must not be empty"));
        }
        if !self.cluster.contains_cluster(&self.cluster.current_cluster) {
            return Err(anyhow!(
                "current_cluster '{}' is not in the cluster list",
                self.cluster.current_cluster
            ));
        }
        if !self.cluster.contains_cluster(&self.cluster.master_cluster) {
            return Err(anyhow!(
                "master_cluster '{}' is not in the cluster list",
                self.cluster.master_cluster
            ));
        }
        let increment = self.cluster.failover_version_increment;
        if increment <= 0 {
            return Err(anyhow!("failover_version_increment must be positive"));
        }
        for entry in &self.cluster.clusters {
            if entry.initial_failover_version < 0 || entry.initial_failover_version >= increment {
                return Err(anyhow!(
                    "initial_failover_version of cluster '{}' must be in [0, {increment})",
                    entry.name
                ));
            }
            let duplicates = self
                .cluster
                .clusters
                .iter()
                .filter(|c| c.initial_failover_version == entry.initial_failover_version)
                .count();
            if duplicates > 1 {
                return Err(anyhow!(
                    "initial_failover_version {} is assigned to more than one cluster",
                    entry.initial_failover_version
                ));
            }
        }
        if self.history.priority_weights.is_empty() {
            return Err(anyhow!("history.priority_weights must not be empty"));
        }
        if self.history.task_worker_count == 0 {
            return Err(anyhow!("history.task_worker_count must be greater than zero"));
        }
        if self.domain.min_retention_days < 0 {
            return Err(anyhow!("domain.min_retention_days must not be negative"));
        }
        Ok(())
    }
}
