// src/core/domain/failover.rs

//! The failover watchdog: completes graceful failovers whose deadline has
//! passed by clearing `FailoverEndTime` through the registry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::registry::DomainRegistry;

/// Page size used when scanning domains for expired failovers.
const SCAN_PAGE_SIZE: usize = 100;

/// Periodically scans for graceful failovers past their deadline.
pub struct FailoverWatchdog {
    registry: Arc<DomainRegistry>,
    scan_interval: Duration,
}

impl FailoverWatchdog {
    pub fn new(registry: Arc<DomainRegistry>, scan_interval: Duration) -> Self {
        Self {
            registry,
            scan_interval,
        }
    }

    /// One scan pass over all domains.
    pub async fn scan_once(&self) {
        let mut page_token = None;
        loop {
            let (records, next) = match self.registry.list(SCAN_PAGE_SIZE, page_token).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Failover watchdog failed to list domains: {e}");
                    return;
                }
            };
            for record in &records {
                if let Some(end_time) = record.failover_end_time
                    && Utc::now() >= end_time
                    && let Err(e) = self
                        .registry
                        .complete_graceful_failover(&record.info.name)
                        .await
                {
                    warn!(
                        "Failed to complete graceful failover of domain '{}': {e}",
                        record.info.name
                    );
                }
            }
            match next {
                Some(token) => page_token = Some(token),
                None => return,
            }
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.scan_once().await,
                _ = shutdown_rx.recv() => {
                    info!("Failover watchdog shutting down.");
                    return;
                }
            }
        }
    }
}
