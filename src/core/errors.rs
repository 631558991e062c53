// src/core/errors.rs

//! Defines the primary error type for the entire engine.

use std::sync::Arc;
use thiserror::Error;

use crate::core::types::{CloseStatus, WorkflowState};

/// Payload returned with [`WarpflowError::AlreadyStarted`], describing the
/// execution that currently owns the `(DomainID, WorkflowID)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowAlreadyStarted {
    pub start_request_id: String,
    pub run_id: String,
    pub state: WorkflowState,
    pub close_status: CloseStatus,
    pub last_write_version: i64,
}

/// The main error enum, representing all possible failures within the engine.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum WarpflowError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Invalid input: illegal state/status combination, unknown cluster,
    /// retention below minimum, or a non-failover mutation on a non-master
    /// cluster. Never retried.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The referenced domain or workflow execution does not exist.
    #[error("Entity not exists: {0}")]
    EntityNotExists(String),

    /// A current execution already occupies the `(DomainID, WorkflowID)` pair.
    #[error("Workflow execution already started with run id {}", .0.run_id)]
    AlreadyStarted(WorkflowAlreadyStarted),

    /// The caller's observed `NextEventID` no longer matches the persisted
    /// condition. The caller reloads mutable state and retries.
    #[error("Condition failed: {0}")]
    ConditionFailed(String),

    /// A write carried a stale `RangeID`. The shard must be re-acquired
    /// before any further writes.
    #[error("Shard {shard_id} ownership lost, current owner: {owner}")]
    ShardOwnershipLost { shard_id: u32, owner: String },

    /// A rate limiter rejected the request; back off longer than for
    /// generic transient failures.
    #[error("Service busy: {0}")]
    ServiceBusy(String),

    /// Replication encountered missing history events and the caller must
    /// re-replicate from the source cluster.
    #[error("Retry task: missing history for domain {domain_id} workflow {workflow_id} run {run_id}")]
    RetryTaskV2 {
        domain_id: String,
        workflow_id: String,
        run_id: String,
    },

    /// The domain is not active in this cluster; writes must go to the
    /// active cluster.
    #[error("Domain {domain} is not active in cluster {current_cluster}, active cluster: {active_cluster}")]
    DomainNotActive {
        domain: String,
        current_cluster: String,
        active_cluster: String,
    },

    #[error("Internal service error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for WarpflowError {
    fn clone(&self) -> Self {
        match self {
            WarpflowError::Io(e) => WarpflowError::Io(Arc::clone(e)),
            WarpflowError::BadRequest(s) => WarpflowError::BadRequest(s.clone()),
            WarpflowError::EntityNotExists(s) => WarpflowError::EntityNotExists(s.clone()),
            WarpflowError::AlreadyStarted(p) => WarpflowError::AlreadyStarted(p.clone()),
            WarpflowError::ConditionFailed(s) => WarpflowError::ConditionFailed(s.clone()),
            WarpflowError::ShardOwnershipLost { shard_id, owner } => {
                WarpflowError::ShardOwnershipLost {
                    shard_id: *shard_id,
                    owner: owner.clone(),
                }
            }
            WarpflowError::ServiceBusy(s) => WarpflowError::ServiceBusy(s.clone()),
            WarpflowError::RetryTaskV2 {
                domain_id,
                workflow_id,
                run_id,
            } => WarpflowError::RetryTaskV2 {
                domain_id: domain_id.clone(),
                workflow_id: workflow_id.clone(),
                run_id: run_id.clone(),
            },
            WarpflowError::DomainNotActive {
                domain,
                current_cluster,
                active_cluster,
            } => WarpflowError::DomainNotActive {
                domain: domain.clone(),
                current_cluster: current_cluster.clone(),
                active_cluster: active_cluster.clone(),
            },
            WarpflowError::Internal(s) => WarpflowError::Internal(s.clone()),
        }
    }
}

impl PartialEq for WarpflowError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WarpflowError::Io(e1), WarpflowError::Io(e2)) => e1.to_string() == e2.to_string(),
            (WarpflowError::BadRequest(s1), WarpflowError::BadRequest(s2)) => s1 == s2,
            (WarpflowError::EntityNotExists(s1), WarpflowError::EntityNotExists(s2)) => s1 == s2,
            (WarpflowError::AlreadyStarted(p1), WarpflowError::AlreadyStarted(p2)) => p1 == p2,
            (WarpflowError::ConditionFailed(s1), WarpflowError::ConditionFailed(s2)) => s1 == s2,
            (
                WarpflowError::ShardOwnershipLost {
                    shard_id: id1,
                    owner: o1,
                },
                WarpflowError::ShardOwnershipLost {
                    shard_id: id2,
                    owner: o2,
                },
            ) => id1 == id2 && o1 == o2,
            (WarpflowError::ServiceBusy(s1), WarpflowError::ServiceBusy(s2)) => s1 == s2,
            (
                WarpflowError::RetryTaskV2 {
                    domain_id: d1,
                    workflow_id: w1,
                    run_id: r1,
                },
                WarpflowError::RetryTaskV2 {
                    domain_id: d2,
                    workflow_id: w2,
                    run_id: r2,
                },
            ) => d1 == d2 && w1 == w2 && r1 == r2,
            (
                WarpflowError::DomainNotActive {
                    domain: d1,
                    current_cluster: c1,
                    active_cluster: a1,
                },
                WarpflowError::DomainNotActive {
                    domain: d2,
                    current_cluster: c2,
                    active_cluster: a2,
                },
            ) => d1 == d2 && c1 == c2 && a1 == a2,
            (WarpflowError::Internal(s1), WarpflowError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl WarpflowError {
    /// Whether a queue processor may re-enqueue the failed task with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WarpflowError::Io(_)
                | WarpflowError::ConditionFailed(_)
                | WarpflowError::ServiceBusy(_)
                | WarpflowError::Internal(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for WarpflowError {
    fn from(e: std::io::Error) -> Self {
        WarpflowError::Io(Arc::new(e))
    }
}

impl From<uuid::Error> for WarpflowError {
    fn from(e: uuid::Error) -> Self {
        WarpflowError::Internal(format!("Failed to parse UUID: {e}"))
    }
}

impl From<serde_json::Error> for WarpflowError {
    fn from(e: serde_json::Error) -> Self {
        WarpflowError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
