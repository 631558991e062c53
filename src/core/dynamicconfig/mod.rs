// src/core/dynamicconfig/mod.rs

//! Typed, filter-aware dynamic configuration. Getters return zero-argument
//! closures that resolve the current value on every call, so limits react to
//! operator changes without a restart.

pub mod collection;
pub mod properties;

pub use collection::{Collection, ConfigSource, InMemoryConfigSource};
pub use properties::{ConfigValue, DynamicConfigKey, Filters};
