// src/core/metrics.rs

//! Defines and registers Prometheus metrics for engine monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec, register_gauge,
    register_histogram,
};

lazy_static! {
    // --- Shard gauges ---
    /// The number of shards currently owned by this host.
    pub static ref OWNED_SHARDS: Gauge =
        register_gauge!("warpflow_owned_shards", "Number of shards currently owned by this host.").unwrap();

    // --- Shard counters ---
    /// The total number of times a shard write was rejected with a stale RangeID.
    pub static ref SHARD_OWNERSHIP_LOST_TOTAL: Counter =
        register_counter!("warpflow_shard_ownership_lost_total", "Total number of shard ownership losses observed.").unwrap();
    /// The total number of shard acquisitions performed by the controller.
    pub static ref SHARD_ACQUISITIONS_TOTAL: Counter =
        register_counter!("warpflow_shard_acquisitions_total", "Total number of shard acquisitions.").unwrap();

    // --- Queue processing counters ---
    /// Tasks completed, labeled by queue kind (transfer, timer, replication).
    pub static ref QUEUE_TASKS_COMPLETED_TOTAL: CounterVec =
        register_counter_vec!("warpflow_queue_tasks_completed_total", "Total number of queue tasks completed, labeled by queue.", &["queue"]).unwrap();
    /// Task retries, labeled by queue kind.
    pub static ref QUEUE_TASKS_RETRIED_TOTAL: CounterVec =
        register_counter_vec!("warpflow_queue_tasks_retried_total", "Total number of queue task retries, labeled by queue.", &["queue"]).unwrap();
    /// Tasks dropped after exhausting their retry budget, labeled by queue kind.
    pub static ref QUEUE_TASKS_DROPPED_TOTAL: CounterVec =
        register_counter_vec!("warpflow_queue_tasks_dropped_total", "Total number of queue tasks dropped, labeled by queue.", &["queue"]).unwrap();
    /// Processing-queue splits performed, labeled by split policy.
    pub static ref QUEUE_SPLITS_TOTAL: CounterVec =
        register_counter_vec!("warpflow_queue_splits_total", "Total number of processing queue splits, labeled by policy.", &["policy"]).unwrap();

    // --- Domain counters ---
    /// Domain failovers performed, labeled by kind (force, graceful).
    pub static ref DOMAIN_FAILOVERS_TOTAL: CounterVec =
        register_counter_vec!("warpflow_domain_failovers_total", "Total number of domain failovers, labeled by kind.", &["kind"]).unwrap();
    /// Replication messages dead-lettered, labeled by domain name.
    pub static ref DOMAIN_REPLICATION_DLQ_TOTAL: CounterVec =
        register_counter_vec!("warpflow_domain_replication_dlq_total", "Total number of domain replication messages dead-lettered, labeled by domain.", &["domain"]).unwrap();

    // --- Histograms ---
    /// The latency of queue task executions in seconds.
    pub static ref QUEUE_TASK_LATENCY_SECONDS: Histogram =
        register_histogram!("warpflow_queue_task_latency_seconds", "Latency of queue task executions in seconds.").unwrap();
}
