//! Runtime selection of the cache backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use shift_core::config::cache::CacheConfig;
use shift_core::error::AppError;
use shift_core::result::AppResult;
use shift_core::traits::cache::CacheProvider;

/// The backend named by `cache.provider`, behind a cloneable handle.
#[derive(Debug, Clone)]
pub struct CacheManager {
    backend: Arc<dyn CacheProvider>,
}

impl CacheManager {
    /// Connect the configured backend.
    pub async fn new(config: &CacheConfig) -> AppResult<Self> {
        let backend: Arc<dyn CacheProvider> = match config.provider.as_str() {
            #[cfg(feature = "memory")]
            "memory" => {
                info!(
                    max_capacity = config.memory.max_capacity,
                    "Using in-memory progress cache"
                );
                Arc::new(crate::memory::MemoryCacheProvider::new(&config.memory))
            }
            #[cfg(feature = "redis-backend")]
            "redis" => {
                let client = crate::redis::RedisClient::connect(&config.redis).await?;
                Arc::new(crate::redis::RedisCacheProvider::new(client))
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown cache provider: '{other}'"
                )));
            }
        };
        Ok(Self { backend })
    }
}

#[async_trait]
impl CacheProvider for CacheManager {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.backend.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.backend.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.backend.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> AppResult<u64> {
        self.backend.delete_many(keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = CacheConfig {
            provider: "memcached".to_string(),
            ..Default::default()
        };
        let err = CacheManager::new(&config).await.unwrap_err();
        assert!(err.is(shift_core::error::ErrorKind::Configuration));
    }

    #[tokio::test]
    async fn test_default_is_memory() {
        let manager = CacheManager::new(&CacheConfig::default()).await.unwrap();
        manager
            .set("job-progress:x", "{}", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            manager.get("job-progress:x").await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
