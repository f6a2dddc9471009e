//! Configuration for the reflection core.
//!
//! # Example
//!
//! ```
//! use reflect_engine::ReflectorConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ReflectorConfig::default();
//! assert_eq!(config.max_update_message_items, 50);
//!
//! // Tuned config
//! let config = ReflectorConfig {
//!     max_nodes_per_session: 1_000,
//!     pool_max_cached_sets: 256,
//!     ..Default::default()
//! };
//! assert!(!config.reflect_to_self);
//! ```

use serde::Deserialize;

/// Configuration for a [`crate::Reflector`] instance.
///
/// All fields have sensible defaults. Updates can be pushed at runtime
/// through the watch channel handed to [`crate::Reflector::with_config_updates`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReflectorConfig {
    /// Flush a session's pending update once it holds this many items
    #[serde(default = "default_max_update_message_items")]
    pub max_update_message_items: usize,

    /// Default node quota for sessions that attach without their own
    #[serde(default = "default_max_nodes_per_session")]
    pub max_nodes_per_session: u32,

    /// Subscriber-set cache bound (distinct content hashes). Only sets no
    /// node holds are dropped to stay under it; live sets may push past it.
    #[serde(default = "default_pool_max_cached_sets")]
    pub pool_max_cached_sets: usize,

    /// Subscriber sets with more entries than this are never cached
    #[serde(default = "default_pool_max_cacheable_set_size")]
    pub pool_max_cacheable_set_size: usize,

    /// Default for whether sessions see their own changes via wildcards
    #[serde(default)]
    pub reflect_to_self: bool,

    /// Host anchor used when a session attaches without a host name
    #[serde(default = "default_host_name")]
    pub host_name: String,
}

fn default_max_update_message_items() -> usize { 50 }
fn default_max_nodes_per_session() -> u32 { u32::MAX }
fn default_pool_max_cached_sets() -> usize { 4096 }
fn default_pool_max_cacheable_set_size() -> usize { 64 }
fn default_host_name() -> String { "localhost".to_string() }

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            max_update_message_items: default_max_update_message_items(),
            max_nodes_per_session: default_max_nodes_per_session(),
            pool_max_cached_sets: default_pool_max_cached_sets(),
            pool_max_cacheable_set_size: default_pool_max_cacheable_set_size(),
            reflect_to_self: false,
            host_name: default_host_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReflectorConfig::default();
        assert_eq!(config.max_update_message_items, 50);
        assert_eq!(config.max_nodes_per_session, u32::MAX);
        assert_eq!(config.pool_max_cached_sets, 4096);
        assert_eq!(config.pool_max_cacheable_set_size, 64);
        assert!(!config.reflect_to_self);
        assert_eq!(config.host_name, "localhost");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReflectorConfig =
            serde_json::from_str(r#"{"max_update_message_items": 5, "reflect_to_self": true}"#)
                .unwrap();
        assert_eq!(config.max_update_message_items, 5);
        assert!(config.reflect_to_self);
        assert_eq!(config.pool_max_cached_sets, 4096);
        assert_eq!(config.host_name, "localhost");
    }

    #[test]
    fn test_empty_json_equals_default() {
        let config: ReflectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReflectorConfig::default());
    }
}
