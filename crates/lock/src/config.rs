// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LockError, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TRUNK_LOCK_";

/// Lock manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerConfig {
    /// Free-list sizes of the per-level lock registries
    #[serde(default)]
    pub pools: PoolConfig,

    /// Maximum idle entries kept by the resource lock table
    #[serde(default = "default_max_free_resource_locks")]
    pub max_free_resource_locks: usize,

    /// Item locks a data owner block holds before escalating
    #[serde(default = "default_data_item_lock_threshold")]
    pub data_item_lock_threshold: usize,

    /// Extent locks a distribution owner block holds before escalating
    #[serde(default = "default_extent_item_lock_threshold")]
    pub extent_item_lock_threshold: usize,

    /// Timeout used by callers that do not supply one
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,
}

/// Maximum number of recycled lock objects kept per level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub database: usize,
    #[serde(default = "default_max_free_locks")]
    pub file_group: usize,
    #[serde(default = "default_max_free_locks")]
    pub object: usize,
    #[serde(default = "default_max_free_locks")]
    pub schema: usize,
    #[serde(default = "default_max_free_locks")]
    pub data: usize,
    #[serde(default = "default_max_free_locks")]
    pub distribution: usize,
    #[serde(default = "default_max_free_locks")]
    pub extent: usize,
    #[serde(default = "default_max_free_locks")]
    pub index: usize,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            pools: PoolConfig::default(),
            max_free_resource_locks: default_max_free_resource_locks(),
            data_item_lock_threshold: default_data_item_lock_threshold(),
            extent_item_lock_threshold: default_extent_item_lock_threshold(),
            default_timeout: default_timeout(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::uniform(0, default_max_free_locks())
    }
}

impl PoolConfig {
    /// Database pool gets its own size, every other level shares `others`
    pub fn uniform(database: usize, others: usize) -> Self {
        Self {
            database,
            file_group: others,
            object: others,
            schema: others,
            data: others,
            distribution: others,
            extent: others,
            index: others,
        }
    }
}

// Default value functions
fn default_max_free_locks() -> usize {
    100
}

fn default_max_free_resource_locks() -> usize {
    100
}

fn default_data_item_lock_threshold() -> usize {
    100
}

fn default_extent_item_lock_threshold() -> usize {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl LockManagerConfig {
    /// Create minimal configuration
    pub fn minimal() -> Self {
        Self {
            pools: PoolConfig::uniform(0, 4),
            max_free_resource_locks: 4,
            data_item_lock_threshold: 5,
            extent_item_lock_threshold: 2,
            default_timeout: Duration::from_secs(1),
        }
    }

    /// Parse configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `TRUNK_LOCK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = Self::default();

        if let Some(value) = var("MAX_FREE_LOCKS") {
            let others = parse_usize("MAX_FREE_LOCKS", &value)?;
            config.pools = PoolConfig::uniform(config.pools.database, others);
        }
        if let Some(value) = var("MAX_FREE_DATABASE_LOCKS") {
            config.pools.database = parse_usize("MAX_FREE_DATABASE_LOCKS", &value)?;
        }
        if let Some(value) = var("MAX_FREE_RESOURCE_LOCKS") {
            config.max_free_resource_locks = parse_usize("MAX_FREE_RESOURCE_LOCKS", &value)?;
        }
        if let Some(value) = var("DATA_ITEM_LOCK_THRESHOLD") {
            config.data_item_lock_threshold = parse_usize("DATA_ITEM_LOCK_THRESHOLD", &value)?;
        }
        if let Some(value) = var("EXTENT_ITEM_LOCK_THRESHOLD") {
            config.extent_item_lock_threshold = parse_usize("EXTENT_ITEM_LOCK_THRESHOLD", &value)?;
        }
        if let Some(value) = var("DEFAULT_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(parse_usize("DEFAULT_TIMEOUT_MS", &value)? as u64);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(LockError::configuration("Default timeout must be greater than zero"));
        }

        if self.data_item_lock_threshold == 0 {
            return Err(LockError::configuration("Data item lock threshold must be greater than zero"));
        }

        if self.extent_item_lock_threshold == 0 {
            return Err(LockError::configuration("Extent item lock threshold must be greater than zero"));
        }

        Ok(())
    }
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| LockError::configuration(format!("{ENV_PREFIX}{name} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LockManagerConfig::default();
        assert_eq!(config.pools.database, 0);
        assert_eq!(config.pools.data, 100);
        assert_eq!(config.data_item_lock_threshold, 100);
        assert_eq!(config.extent_item_lock_threshold, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config() {
        let config = LockManagerConfig::minimal();
        assert_eq!(config.data_item_lock_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LockManagerConfig::default();
        config.default_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config = LockManagerConfig::default();
        config.extent_item_lock_threshold = 0;
        assert!(matches!(config.validate(), Err(LockError::Configuration { .. })));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = LockManagerConfig::from_json(r#"{"data_item_lock_threshold": 7, "pools": {"object": 3}}"#).unwrap();
        assert_eq!(config.data_item_lock_threshold, 7);
        assert_eq!(config.pools.object, 3);
        assert_eq!(config.pools.data, 100);
        assert_eq!(config.default_timeout, Duration::from_secs(10));

        assert!(LockManagerConfig::from_json("{").is_err());
        assert!(LockManagerConfig::from_json(r#"{"data_item_lock_threshold": 0}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<String, String> = [
            ("TRUNK_LOCK_MAX_FREE_LOCKS", "8"),
            ("TRUNK_LOCK_DATA_ITEM_LOCK_THRESHOLD", "12"),
            ("TRUNK_LOCK_DEFAULT_TIMEOUT_MS", "250"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = LockManagerConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(config.pools.index, 8);
        assert_eq!(config.pools.database, 0);
        assert_eq!(config.data_item_lock_threshold, 12);
        assert_eq!(config.default_timeout, Duration::from_millis(250));

        let bad = LockManagerConfig::from_lookup(|name| (name == "TRUNK_LOCK_MAX_FREE_LOCKS").then(|| "lots".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_serialization() {
        let config = LockManagerConfig::minimal();
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: LockManagerConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }
}
