//! Key/value cache seam behind the job progress cache.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::result::AppResult;

/// String key/value store with per-entry expiry.
///
/// Values are opaque strings; the typed helpers below store JSON.
#[async_trait]
pub trait CacheProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Read a value, `None` when missing or expired.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Remove a key. Returns whether it was present.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Remove several keys, returning how many were present.
    async fn delete_many(&self, keys: &[String]) -> AppResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read and decode a JSON value.
    async fn get_json<T>(&self, key: &str) -> AppResult<Option<T>>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Encode and write a JSON value.
    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> AppResult<()>
    where
        Self: Sized,
        T: Serialize + Send + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }
}
