//! [`CacheProvider`] over Redis strings.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use shift_core::error::{AppError, ErrorKind};
use shift_core::result::AppResult;
use shift_core::traits::cache::CacheProvider;

use super::client::RedisClient;

/// Stores each entry as a Redis string with `SET EX`.
#[derive(Debug, Clone)]
pub struct RedisCacheProvider {
    client: RedisClient,
}

impl RedisCacheProvider {
    /// Wrap a connected client.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

fn redis_error(e: redis::RedisError) -> AppError {
    AppError::with_source(ErrorKind::Cache, format!("Redis error: {e}"), e)
}

/// Redis rejects `EX 0`; round sub-second TTLs up.
fn expiry_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.client.conn_mut();
        conn.get(self.client.prefixed_key(key))
            .await
            .map_err(redis_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.client.conn_mut();
        conn.set_ex::<_, _, ()>(self.client.prefixed_key(key), value, expiry_seconds(ttl))
            .await
            .map_err(redis_error)
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let removed: u64 = conn
            .del(self.client.prefixed_key(key))
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.client.prefixed_key(k)).collect();
        let mut conn = self.client.conn_mut();
        conn.del(prefixed).await.map_err(redis_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_at_least_one_second() {
        assert_eq!(expiry_seconds(Duration::from_millis(10)), 1);
        assert_eq!(expiry_seconds(Duration::from_secs(90)), 90);
    }
}
