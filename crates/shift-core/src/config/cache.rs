//! `[cache]` section: where job progress is mirrored.

use serde::{Deserialize, Serialize};

/// Progress cache backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `"memory"` or `"redis"`.
    pub provider: String,
    /// Lifetime of a progress entry that is never evicted explicitly.
    pub progress_ttl_seconds: u64,
    /// Used when `provider = "redis"`.
    pub redis: RedisCacheConfig,
    /// Used when `provider = "memory"`.
    pub memory: MemoryCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            progress_ttl_seconds: 3600,
            redis: RedisCacheConfig::default(),
            memory: MemoryCacheConfig::default(),
        }
    }
}

/// `[cache.redis]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,
    /// Prepended to every key so several deployments can share an instance.
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "shift:".to_string(),
        }
    }
}

/// `[cache.memory]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Entry count bound.
    pub max_capacity: u64,
    /// Upper bound on any entry's lifetime.
    pub max_ttl_seconds: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            max_ttl_seconds: 3600,
        }
    }
}
