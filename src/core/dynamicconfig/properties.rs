// src/core/dynamicconfig/properties.rs

//! The enumerated dynamic-config keys, their defaults, and the filter set a
//! lookup may carry.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::Display;

use crate::core::types::ShardId;

/// A dynamically resolvable value. The variant is fixed per key; a source
/// returning a mismatched variant counts as a lookup failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Duration(Duration),
    Map(serde_json::Map<String, serde_json::Value>),
}

/// Every dynamic-config key known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DynamicConfigKey {
    /// Attempts before a queue task is dropped (or dead-lettered).
    TaskMaxRetryCount,
    /// Enables splitting a domain with too many pending tasks into its own
    /// processing queue.
    EnablePendingTaskSplit,
    /// Pending-task count per domain above which the domain is split out.
    PendingTaskSplitThreshold,
    /// Enables forking a sub-queue around a task stuck in retries.
    EnableStuckTaskSplit,
    /// Attempt count above which a task is considered stuck.
    StuckTaskSplitAttemptThreshold,
    /// Enables probabilistic domain splits for load shedding experiments.
    EnableRandomTaskSplit,
    /// Probability of a random split per poll cycle.
    RandomTaskSplitProbability,
    /// Look-ahead horizon granted to a stuck-task sub-queue.
    StuckTaskSplitLookAhead,
    /// Maximum processing-queue split depth.
    QueueSplitMaxLevel,
    /// Persist processing-queue states into the shard record.
    EnablePersistQueueStates,
    /// Inline history-archival size limit; larger payloads go to the archiver.
    HistoryArchivalSizeLimit,
    /// Interval between redispatch sweeps of failed tasks.
    TaskRedispatchInterval,
}

impl DynamicConfigKey {
    /// The value used when the source has no entry or the lookup fails.
    pub fn default_value(&self) -> ConfigValue {
        match self {
            DynamicConfigKey::TaskMaxRetryCount => ConfigValue::Int(10),
            DynamicConfigKey::EnablePendingTaskSplit => ConfigValue::Bool(true),
            DynamicConfigKey::PendingTaskSplitThreshold => ConfigValue::Int(1000),
            DynamicConfigKey::EnableStuckTaskSplit => ConfigValue::Bool(true),
            DynamicConfigKey::StuckTaskSplitAttemptThreshold => ConfigValue::Int(50),
            DynamicConfigKey::EnableRandomTaskSplit => ConfigValue::Bool(false),
            DynamicConfigKey::RandomTaskSplitProbability => ConfigValue::Float(0.01),
            DynamicConfigKey::StuckTaskSplitLookAhead => ConfigValue::Int(500),
            DynamicConfigKey::QueueSplitMaxLevel => ConfigValue::Int(2),
            DynamicConfigKey::EnablePersistQueueStates => ConfigValue::Bool(true),
            DynamicConfigKey::HistoryArchivalSizeLimit => ConfigValue::Int(300 * 1024),
            DynamicConfigKey::TaskRedispatchInterval => {
                ConfigValue::Duration(Duration::from_secs(5))
            }
        }
    }
}

/// Filter options attached to a lookup. All fields are optional; a source
/// matches the most specific entry it has.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Filters {
    pub domain_name: Option<String>,
    pub task_list: Option<String>,
    pub task_type: Option<String>,
    pub shard_id: Option<ShardId>,
    pub cluster: Option<String>,
}

impl Filters {
    pub fn for_domain(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: Some(domain_name.into()),
            ..Default::default()
        }
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_shard_id(mut self, shard_id: ShardId) -> Self {
        self.shard_id = Some(shard_id);
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Filters::default()
    }
}
