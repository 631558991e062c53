// src/core/domain/mod.rs

//! The domain (namespace) registry with global/local scope, failover
//! versioning, and the cross-region replication processor that applies
//! domain changes on remote clusters.

pub mod failover;
pub mod registry;
pub mod replication_processor;

pub use failover::FailoverWatchdog;
pub use registry::{DomainRegistry, RegisterDomainRequest, UpdateDomainRequest};
pub use replication_processor::{
    DomainReplicationApplier, DomainReplicationProcessor, DomainReplicationTaskExecutor,
    LocalReplicationClient, RemoteReplicationClient,
};
