// src/core/domain/registry.rs

//! The domain registry: registration, updates, failover, deprecation, and
//! listing, with a notification-version-triggered read-through cache and
//! replication publication for global domains.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::core::errors::WarpflowError;
use crate::core::metrics;
use crate::core::persistence::store::{DomainReplicationQueue, DomainStore};
use crate::core::persistence::types::{
    BadBinaryInfo, DomainConfigRecord, DomainInfo, DomainOperation, DomainRecord,
    DomainReplicationConfig, DomainTaskAttributes,
};
use crate::core::types::{ArchivalStatus, DomainStatus, EMPTY_VERSION};

/// Page size used when the cache refresh walks the full domain list.
const CACHE_REFRESH_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct RegisterDomainRequest {
    pub name: String,
    pub description: String,
    pub owner_email: String,
    pub retention_days: i32,
    pub emit_metric: bool,
    pub is_global: bool,
    /// Defaults to the local cluster for local domains.
    pub active_cluster_name: Option<String>,
    /// Defaults to `[local]` for local domains and all known clusters for
    /// global ones.
    pub clusters: Option<Vec<String>>,
    pub data: HashMap<String, String>,
    pub history_archival_status: Option<ArchivalStatus>,
    pub history_archival_uri: Option<String>,
    pub visibility_archival_status: Option<ArchivalStatus>,
    pub visibility_archival_uri: Option<String>,
}

impl Default for RegisterDomainRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            owner_email: String::new(),
            retention_days: 1,
            // Metric emission is opt-out.
            emit_metric: true,
            is_global: false,
            active_cluster_name: None,
            clusters: None,
            data: HashMap::new(),
            history_archival_status: None,
            history_archival_uri: None,
            visibility_archival_status: None,
            visibility_archival_uri: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDomainRequest {
    pub name: String,
    pub description: Option<String>,
    pub owner_email: Option<String>,
    /// Merged into the stored map; latest value wins.
    pub data: Option<HashMap<String, String>>,
    pub retention_days: Option<i32>,
    pub emit_metric: Option<bool>,
    /// Merged; new or overwritten entries are stamped with the current time.
    pub bad_binaries: Option<HashMap<String, BadBinaryInfo>>,
    pub history_archival_status: Option<ArchivalStatus>,
    pub history_archival_uri: Option<String>,
    pub visibility_archival_status: Option<ArchivalStatus>,
    pub visibility_archival_uri: Option<String>,
    /// A change of active cluster is a failover.
    pub active_cluster_name: Option<String>,
    pub clusters: Option<Vec<String>>,
    /// Present and positive: graceful failover with this timeout. Present
    /// and zero: treated as a force failover.
    pub failover_timeout_seconds: Option<i32>,
}

impl UpdateDomainRequest {
    /// Whether the request touches anything besides the active cluster.
    fn has_non_failover_changes(&self) -> bool {
        self.description.is_some()
            || self.owner_email.is_some()
            || self.data.is_some()
            || self.retention_days.is_some()
            || self.emit_metric.is_some()
            || self.bad_binaries.is_some()
            || self.history_archival_status.is_some()
            || self.history_archival_uri.is_some()
            || self.visibility_archival_status.is_some()
            || self.visibility_archival_uri.is_some()
            || self.clusters.is_some()
    }
}

/// The domain registry of one cluster.
pub struct DomainRegistry {
    store: Arc<dyn DomainStore>,
    replication_queue: Arc<dyn DomainReplicationQueue>,
    cluster: ClusterConfig,
    min_retention_days: i32,
    failover_cooldown: Duration,
    cache_refresh_interval: Duration,
    cache_by_name: DashMap<String, Arc<DomainRecord>>,
    cache_by_id: DashMap<String, Arc<DomainRecord>>,
    cached_notification_version: AtomicI64,
}

impl DomainRegistry {
    pub fn new(
        store: Arc<dyn DomainStore>,
        replication_queue: Arc<dyn DomainReplicationQueue>,
        cluster: ClusterConfig,
        min_retention_days: i32,
        failover_cooldown: Duration,
        cache_refresh_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            replication_queue,
            cluster,
            min_retention_days,
            failover_cooldown,
            cache_refresh_interval,
            cache_by_name: DashMap::new(),
            cache_by_id: DashMap::new(),
            cached_notification_version: AtomicI64::new(-1),
        })
    }

    fn local_cluster(&self) -> &str {
        &self.cluster.current_cluster
    }

    /// Registers a domain and returns its generated UUID.
    pub async fn register(&self, request: RegisterDomainRequest) -> Result<String, WarpflowError> {
        if request.name.is_empty() {
            return Err(WarpflowError::BadRequest(
                "Domain name must not be empty".to_string(),
            ));
        }
        if request.retention_days < self.min_retention_days {
            return Err(WarpflowError::BadRequest(format!(
                "Retention of {} day(s) is below the minimum of {}",
                request.retention_days, self.min_retention_days
            )));
        }
        if request.is_global && !self.cluster.is_master_cluster() {
            return Err(WarpflowError::BadRequest(format!(
                "Global domains can only be registered on the master cluster '{}'",
                self.cluster.master_cluster
            )));
        }

        let active_cluster = request
            .active_cluster_name
            .clone()
            .unwrap_or_else(|| self.local_cluster().to_string());
        let clusters = match (&request.clusters, request.is_global) {
            (Some(clusters), _) => clusters.clone(),
            (None, true) => self.cluster.cluster_names(),
            (None, false) => vec![self.local_cluster().to_string()],
        };
        if !request.is_global {
            // A local domain lives on exactly the local cluster.
            if clusters != vec![self.local_cluster().to_string()]
                || active_cluster != self.local_cluster()
            {
                return Err(WarpflowError::BadRequest(
                    "A local domain must name exactly the local cluster".to_string(),
                ));
            }
        }
        for cluster in &clusters {
            if !self.cluster.contains_cluster(cluster) {
                return Err(WarpflowError::BadRequest(format!(
                    "Unknown cluster '{cluster}'"
                )));
            }
        }
        if !clusters.contains(&active_cluster) {
            return Err(WarpflowError::BadRequest(format!(
                "Active cluster '{active_cluster}' is not in the cluster list"
            )));
        }
        validate_archival(
            request.history_archival_status.unwrap_or_default(),
            request.history_archival_uri.as_deref().unwrap_or_default(),
        )?;
        validate_archival(
            request.visibility_archival_status.unwrap_or_default(),
            request
                .visibility_archival_uri
                .as_deref()
                .unwrap_or_default(),
        )?;

        let failover_version = if request.is_global {
            self.cluster
                .next_failover_version(&active_cluster, EMPTY_VERSION)
        } else {
            EMPTY_VERSION
        };

        let record = DomainRecord {
            info: DomainInfo {
                id: Uuid::new_v4().to_string(),
                name: request.name.clone(),
                status: DomainStatus::Registered,
                description: request.description,
                owner_email: request.owner_email,
                data: request.data,
            },
            config: DomainConfigRecord {
                retention_days: request.retention_days,
                emit_metric: request.emit_metric,
                history_archival_status: request.history_archival_status.unwrap_or_default(),
                history_archival_uri: request.history_archival_uri.unwrap_or_default(),
                visibility_archival_status: request.visibility_archival_status.unwrap_or_default(),
                visibility_archival_uri: request.visibility_archival_uri.unwrap_or_default(),
                bad_binaries: HashMap::new(),
            },
            replication_config: DomainReplicationConfig {
                active_cluster_name: active_cluster,
                clusters,
            },
            is_global: request.is_global,
            config_version: 0,
            failover_version,
            previous_failover_version: EMPTY_VERSION,
            failover_end_time: None,
            last_updated_time: Utc::now(),
            notification_version: 0,
        };

        let id = self.store.create_domain(record.clone()).await?;
        info!("Registered domain '{}' ({}).", record.info.name, id);
        if record.is_global {
            self.publish(DomainOperation::Create, &record).await?;
        }
        self.invalidate(&record.info.name, &record.info.id);
        Ok(id)
    }

    /// Updates a domain; an `active_cluster_name` change is a failover.
    pub async fn update(&self, request: UpdateDomainRequest) -> Result<DomainRecord, WarpflowError> {
        let mut record = self.store.get_domain_by_name(&request.name).await?;
        if record.info.status != DomainStatus::Registered {
            return Err(WarpflowError::BadRequest(format!(
                "Domain '{}' is {}",
                request.name, record.info.status
            )));
        }

        let is_failover = request
            .active_cluster_name
            .as_deref()
            .is_some_and(|new_active| new_active != record.replication_config.active_cluster_name);

        if record.is_global
            && !self.cluster.is_master_cluster()
            && request.has_non_failover_changes()
        {
            return Err(WarpflowError::BadRequest(format!(
                "Only the master cluster '{}' may update a global domain's attributes",
                self.cluster.master_cluster
            )));
        }
        if !record.is_global && is_failover {
            return Err(WarpflowError::BadRequest(
                "A local domain cannot fail over".to_string(),
            ));
        }
        if request.failover_timeout_seconds.is_some() && !is_failover {
            return Err(WarpflowError::BadRequest(
                "A failover timeout requires a change of active cluster".to_string(),
            ));
        }

        let mut config_changed = false;
        if let Some(description) = request.description {
            record.info.description = description;
            config_changed = true;
        }
        if let Some(owner_email) = request.owner_email {
            record.info.owner_email = owner_email;
            config_changed = true;
        }
        if let Some(data) = request.data {
            // Latest value wins per key.
            record.info.data.extend(data);
            config_changed = true;
        }
        if let Some(retention_days) = request.retention_days {
            if retention_days < self.min_retention_days {
                return Err(WarpflowError::BadRequest(format!(
                    "Retention of {retention_days} day(s) is below the minimum of {}",
                    self.min_retention_days
                )));
            }
            record.config.retention_days = retention_days;
            config_changed = true;
        }
        if let Some(emit_metric) = request.emit_metric {
            record.config.emit_metric = emit_metric;
            config_changed = true;
        }
        if let Some(bad_binaries) = request.bad_binaries {
            let now_nano = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            for (checksum, mut info) in bad_binaries {
                info.created_time_nano = now_nano;
                record.config.bad_binaries.insert(checksum, info);
            }
            config_changed = true;
        }
        if let Some(status) = request.history_archival_status {
            record.config.history_archival_status = status;
            config_changed = true;
        }
        if let Some(uri) = request.history_archival_uri {
            record.config.history_archival_uri = uri;
            config_changed = true;
        }
        if let Some(status) = request.visibility_archival_status {
            record.config.visibility_archival_status = status;
            config_changed = true;
        }
        if let Some(uri) = request.visibility_archival_uri {
            record.config.visibility_archival_uri = uri;
            config_changed = true;
        }
        if let Some(clusters) = request.clusters {
            for cluster in &clusters {
                if !self.cluster.contains_cluster(cluster) {
                    return Err(WarpflowError::BadRequest(format!(
                        "Unknown cluster '{cluster}'"
                    )));
                }
            }
            record.replication_config.clusters = clusters;
            config_changed = true;
        }
        validate_archival(
            record.config.history_archival_status,
            &record.config.history_archival_uri,
        )?;
        validate_archival(
            record.config.visibility_archival_status,
            &record.config.visibility_archival_uri,
        )?;
        if config_changed {
            record.config_version += 1;
        }

        if is_failover {
            let new_active = request
                .active_cluster_name
                .clone()
                .expect("is_failover implies an active cluster");
            self.apply_failover(&mut record, &new_active, request.failover_timeout_seconds)?;
        }

        record.last_updated_time = Utc::now();
        self.store.update_domain(record.clone()).await?;
        if record.is_global {
            self.publish(DomainOperation::Update, &record).await?;
        }
        self.invalidate(&record.info.name, &record.info.id);
        Ok(self.store.get_domain_by_name(&record.info.name).await?)
    }

    /// Applies a force or graceful failover to the loaded record.
    fn apply_failover(
        &self,
        record: &mut DomainRecord,
        new_active: &str,
        failover_timeout_seconds: Option<i32>,
    ) -> Result<(), WarpflowError> {
        if !record
            .replication_config
            .clusters
            .iter()
            .any(|c| c == new_active)
        {
            return Err(WarpflowError::BadRequest(format!(
                "Cannot fail over to '{new_active}': not in the domain's cluster list"
            )));
        }
        let cooldown =
            ChronoDuration::from_std(self.failover_cooldown).unwrap_or_else(|_| ChronoDuration::zero());
        if Utc::now() < record.last_updated_time + cooldown {
            return Err(WarpflowError::BadRequest(format!(
                "Domain '{}' failed over too recently; cooldown is {:?}",
                record.info.name, self.failover_cooldown
            )));
        }

        // A zero timeout degrades to a force failover.
        let graceful = matches!(failover_timeout_seconds, Some(timeout) if timeout > 0);
        if graceful {
            let timeout = failover_timeout_seconds.expect("checked above");
            if new_active != self.local_cluster() {
                return Err(WarpflowError::BadRequest(
                    "A graceful failover must target the local cluster".to_string(),
                ));
            }
            if record.failover_end_time.is_some() {
                return Err(WarpflowError::BadRequest(format!(
                    "Domain '{}' already has a graceful failover in flight",
                    record.info.name
                )));
            }
            record.previous_failover_version = record.failover_version;
            record.failover_end_time = Some(Utc::now() + ChronoDuration::seconds(timeout as i64));
            metrics::DOMAIN_FAILOVERS_TOTAL
                .with_label_values(&["graceful"])
                .inc();
        } else {
            // A force failover aborts any graceful failover in flight.
            record.failover_end_time = None;
            record.previous_failover_version = EMPTY_VERSION;
            metrics::DOMAIN_FAILOVERS_TOTAL
                .with_label_values(&["force"])
                .inc();
        }

        record.failover_version = self
            .cluster
            .next_failover_version(new_active, record.failover_version);
        record.replication_config.active_cluster_name = new_active.to_string();
        info!(
            "Domain '{}' failing over to '{}' at version {} ({}).",
            record.info.name,
            new_active,
            record.failover_version,
            if graceful { "graceful" } else { "force" }
        );
        Ok(())
    }

    /// Clears an expired graceful failover. Called by the failover watchdog.
    pub async fn complete_graceful_failover(
        &self,
        name: &str,
    ) -> Result<(), WarpflowError> {
        let mut record = self.store.get_domain_by_name(name).await?;
        let Some(end_time) = record.failover_end_time else {
            return Ok(());
        };
        if Utc::now() < end_time {
            return Ok(());
        }
        record.failover_end_time = None;
        record.last_updated_time = Utc::now();
        self.store.update_domain(record.clone()).await?;
        if record.is_global {
            self.publish(DomainOperation::Update, &record).await?;
        }
        self.invalidate(&record.info.name, &record.info.id);
        info!("Graceful failover of domain '{name}' completed.");
        Ok(())
    }

    pub async fn describe(&self, name: &str) -> Result<DomainRecord, WarpflowError> {
        if let Some(cached) = self.cache_by_name.get(name) {
            return Ok((**cached).clone());
        }
        let record = self.store.get_domain_by_name(name).await?;
        self.fill_cache(&record);
        Ok(record)
    }

    pub async fn describe_by_id(&self, id: &str) -> Result<DomainRecord, WarpflowError> {
        if let Some(cached) = self.cache_by_id.get(id) {
            return Ok((**cached).clone());
        }
        let record = self.store.get_domain_by_id(id).await?;
        self.fill_cache(&record);
        Ok(record)
    }

    pub async fn deprecate(&self, name: &str) -> Result<(), WarpflowError> {
        let mut record = self.store.get_domain_by_name(name).await?;
        if record.is_global && !self.cluster.is_master_cluster() {
            return Err(WarpflowError::BadRequest(format!(
                "Only the master cluster '{}' may deprecate a global domain",
                self.cluster.master_cluster
            )));
        }
        record.info.status = DomainStatus::Deprecated;
        record.config_version += 1;
        record.last_updated_time = Utc::now();
        self.store.update_domain(record.clone()).await?;
        if record.is_global {
            self.publish(DomainOperation::Update, &record).await?;
        }
        self.invalidate(&record.info.name, &record.info.id);
        info!("Deprecated domain '{name}'.");
        Ok(())
    }

    pub async fn list(
        &self,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<(Vec<DomainRecord>, Option<String>), WarpflowError> {
        self.store.list_domains(page_size, page_token).await
    }

    /// Whether the domain accepts user-initiated writes on this cluster.
    pub async fn is_active_locally(&self, name: &str) -> Result<bool, WarpflowError> {
        let record = self.describe(name).await?;
        if !record.is_global {
            return Ok(true);
        }
        Ok(record.replication_config.active_cluster_name == self.local_cluster())
    }

    async fn publish(
        &self,
        operation: DomainOperation,
        record: &DomainRecord,
    ) -> Result<(), WarpflowError> {
        let message_id = self
            .replication_queue
            .publish(DomainTaskAttributes {
                operation,
                id: record.info.id.clone(),
                info: record.info.clone(),
                config: record.config.clone(),
                replication_config: record.replication_config.clone(),
                config_version: record.config_version,
                failover_version: record.failover_version,
                previous_failover_version: record.previous_failover_version,
                failover_end_time: record.failover_end_time,
            })
            .await?;
        debug!(
            "Published domain replication message {message_id} for '{}'.",
            record.info.name
        );
        Ok(())
    }

    fn fill_cache(&self, record: &DomainRecord) {
        let shared = Arc::new(record.clone());
        self.cache_by_name
            .insert(record.info.name.clone(), Arc::clone(&shared));
        self.cache_by_id.insert(record.info.id.clone(), shared);
    }

    fn invalidate(&self, name: &str, id: &str) {
        self.cache_by_name.remove(name);
        self.cache_by_id.remove(id);
    }

    /// Reloads the cache when the store's notification version has advanced.
    pub async fn refresh_cache(&self) -> Result<(), WarpflowError> {
        let version = self.store.get_metadata().await?;
        if version <= self.cached_notification_version.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut page_token = None;
        loop {
            let (records, next) = self
                .store
                .list_domains(CACHE_REFRESH_PAGE_SIZE, page_token)
                .await?;
            for record in &records {
                self.fill_cache(record);
            }
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        self.cached_notification_version
            .store(version, Ordering::Release);
        Ok(())
    }

    /// Runs the periodic cache refresh until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.cache_refresh_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.refresh_cache().await {
                        warn!("Domain cache refresh failed: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Domain registry cache refresher shutting down.");
                    return;
                }
            }
        }
    }
}

fn validate_archival(status: ArchivalStatus, uri: &str) -> Result<(), WarpflowError> {
    if status == ArchivalStatus::Enabled && uri.is_empty() {
        return Err(WarpflowError::BadRequest(
            "Archival cannot be enabled without a URI".to_string(),
        ));
    }
    Ok(())
}
