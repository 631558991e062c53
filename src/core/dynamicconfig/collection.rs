// src/core/dynamicconfig/collection.rs

//! The read-through collection over a dynamic-config source, exposing typed
//! getters that return zero-argument closures.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::errors::WarpflowError;

use super::properties::{ConfigValue, DynamicConfigKey, Filters};

/// Lookup failures for a key are logged once per this many occurrences.
const ERROR_LOG_SAMPLE_RATE: u64 = 1000;

/// A provider of dynamic-config values. Implementations may be backed by a
/// file watcher, a config service client, or the in-memory source below.
pub trait ConfigSource: Send + Sync + 'static {
    /// Resolves `key` under `filters`. `Ok(None)` means "no override"; the
    /// collection then falls back to the key's default.
    fn get(
        &self,
        key: DynamicConfigKey,
        filters: &Filters,
    ) -> Result<Option<ConfigValue>, WarpflowError>;
}

/// An in-memory source. Exact `(key, filters)` overrides win over key-wide
/// ones. Used in tests and as the seed source for operator tooling.
#[derive(Debug, Default)]
pub struct InMemoryConfigSource {
    by_key: DashMap<DynamicConfigKey, ConfigValue>,
    by_key_and_filters: DashMap<(DynamicConfigKey, Filters), ConfigValue>,
}

impl InMemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: DynamicConfigKey, value: ConfigValue) {
        self.by_key.insert(key, value);
    }

    pub fn set_filtered(&self, key: DynamicConfigKey, filters: Filters, value: ConfigValue) {
        self.by_key_and_filters.insert((key, filters), value);
    }

    pub fn unset(&self, key: DynamicConfigKey) {
        self.by_key.remove(&key);
    }
}

impl ConfigSource for InMemoryConfigSource {
    fn get(
        &self,
        key: DynamicConfigKey,
        filters: &Filters,
    ) -> Result<Option<ConfigValue>, WarpflowError> {
        if let Some(value) = self.by_key_and_filters.get(&(key, filters.clone())) {
            return Ok(Some(value.clone()));
        }
        Ok(self.by_key.get(&key).map(|v| v.clone()))
    }
}

/// A zero-argument closure resolving the current value of one property.
pub type IntPropertyFn = Arc<dyn Fn() -> i64 + Send + Sync>;
pub type FloatPropertyFn = Arc<dyn Fn() -> f64 + Send + Sync>;
pub type BoolPropertyFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type StringPropertyFn = Arc<dyn Fn() -> String + Send + Sync>;
pub type DurationPropertyFn = Arc<dyn Fn() -> Duration + Send + Sync>;
pub type MapPropertyFn =
    Arc<dyn Fn() -> serde_json::Map<String, serde_json::Value> + Send + Sync>;

/// The filter-aware, read-through accessor. Each getter call builds a closure
/// with the key and filters baked in; every invocation of the closure resolves
/// the live value, falling back to the key's default on failure.
pub struct Collection {
    source: Arc<dyn ConfigSource>,
    error_counts: DashMap<DynamicConfigKey, AtomicU64>,
    logged_values: DashMap<(DynamicConfigKey, Filters), ConfigValue>,
}

impl Collection {
    pub fn new(source: Arc<dyn ConfigSource>) -> Arc<Self> {
        Arc::new(Self {
            source,
            error_counts: DashMap::new(),
            logged_values: DashMap::new(),
        })
    }

    fn resolve(&self, key: DynamicConfigKey, filters: &Filters) -> Option<ConfigValue> {
        match self.source.get(key, filters) {
            Ok(found) => {
                if let Some(value) = &found {
                    self.log_value_change(key, filters, value);
                }
                found
            }
            Err(e) => {
                let count = self
                    .error_counts
                    .entry(key)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if count % ERROR_LOG_SAMPLE_RATE == 1 {
                    warn!(
                        "Dynamic config lookup for {key} failed {count} time(s), using default: {e}"
                    );
                }
                None
            }
        }
    }

    /// Logs a value once when it is first observed and again whenever the
    /// observed value changes.
    fn log_value_change(&self, key: DynamicConfigKey, filters: &Filters, value: &ConfigValue) {
        let map_key = (key, filters.clone());
        let changed = match self.logged_values.get(&map_key) {
            Some(previous) => *previous != *value,
            None => true,
        };
        if changed {
            info!("Dynamic config {key} with filters {filters:?} resolved to {value:?}");
            self.logged_values.insert(map_key, value.clone());
        }
    }

    pub fn get_int(self: &Arc<Self>, key: DynamicConfigKey) -> IntPropertyFn {
        self.get_int_with_filters(key, Filters::default())
    }

    pub fn get_int_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> IntPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Int(v) => v,
            _ => 0,
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Int(v)) => v,
            _ => fallback,
        })
    }

    pub fn get_float(self: &Arc<Self>, key: DynamicConfigKey) -> FloatPropertyFn {
        self.get_float_with_filters(key, Filters::default())
    }

    pub fn get_float_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> FloatPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Float(v) => v,
            _ => 0.0,
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Float(v)) => v,
            _ => fallback,
        })
    }

    pub fn get_bool(self: &Arc<Self>, key: DynamicConfigKey) -> BoolPropertyFn {
        self.get_bool_with_filters(key, Filters::default())
    }

    pub fn get_bool_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> BoolPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Bool(v) => v,
            _ => false,
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Bool(v)) => v,
            _ => fallback,
        })
    }

    pub fn get_string(self: &Arc<Self>, key: DynamicConfigKey) -> StringPropertyFn {
        self.get_string_with_filters(key, Filters::default())
    }

    pub fn get_string_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> StringPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Str(v) => v,
            _ => String::new(),
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Str(v)) => v,
            _ => fallback.clone(),
        })
    }

    pub fn get_duration(self: &Arc<Self>, key: DynamicConfigKey) -> DurationPropertyFn {
        self.get_duration_with_filters(key, Filters::default())
    }

    pub fn get_duration_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> DurationPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Duration(v) => v,
            _ => Duration::ZERO,
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Duration(v)) => v,
            _ => fallback,
        })
    }

    pub fn get_map(self: &Arc<Self>, key: DynamicConfigKey) -> MapPropertyFn {
        self.get_map_with_filters(key, Filters::default())
    }

    pub fn get_map_with_filters(
        self: &Arc<Self>,
        key: DynamicConfigKey,
        filters: Filters,
    ) -> MapPropertyFn {
        let this = Arc::clone(self);
        let fallback = match key.default_value() {
            ConfigValue::Map(v) => v,
            _ => serde_json::Map::new(),
        };
        Arc::new(move || match this.resolve(key, &filters) {
            Some(ConfigValue::Map(v)) => v,
            _ => fallback.clone(),
        })
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").finish_non_exhaustive()
    }
}
