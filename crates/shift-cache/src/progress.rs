//! Job progress cache.
//!
//! A fast, best-effort mirror of each running job's latest status and
//! progress. Entries are rewritten on every progress update and removed
//! shortly after the job finishes; nothing here is durable.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use shift_core::result::AppResult;
use shift_core::traits::cache::CacheProvider;
use shift_core::types::JobId;
use shift_entity::job::{CachedProgress, JobStatus, ProgressInfo};

use crate::keys;
use crate::provider::CacheManager;

/// Progress cache seam used by the worker and the client.
///
/// Callers treat every method as fire-and-forget: a failure is logged and
/// never changes a job's outcome.
#[async_trait]
pub trait ProgressCache: Send + Sync + std::fmt::Debug + 'static {
    /// Record a progress update, creating the entry if needed.
    async fn set_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()>;

    /// Record a status change, creating the entry if needed.
    async fn set_status(&self, job_id: JobId, status: JobStatus) -> AppResult<()>;

    /// Append an error message and mark the entry as failed.
    async fn set_error(&self, job_id: JobId, message: &str) -> AppResult<()>;

    /// Read the cached entry for a job.
    async fn get(&self, job_id: JobId) -> AppResult<Option<CachedProgress>>;

    /// Remove the entries for the given jobs.
    async fn delete(&self, job_ids: &[JobId]) -> AppResult<()>;
}

/// [`ProgressCache`] stored as JSON documents in any cache provider.
#[derive(Debug, Clone)]
pub struct CachedJobProgress {
    cache: CacheManager,
    ttl: Duration,
}

impl CachedJobProgress {
    /// Wrap a cache manager. Entries expire after `ttl` if never deleted.
    pub fn new(cache: CacheManager, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    async fn modify(&self, job_id: JobId, f: impl FnOnce(&mut CachedProgress) + Send) -> AppResult<()> {
        let key = keys::job_progress(job_id);
        let mut entry = self
            .cache
            .get_json::<CachedProgress>(&key)
            .await?
            .unwrap_or_else(|| CachedProgress::new(job_id));
        f(&mut entry);
        entry.updated = Utc::now();
        self.cache.set_json(&key, &entry, self.ttl).await
    }
}

#[async_trait]
impl ProgressCache for CachedJobProgress {
    async fn set_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()> {
        self.modify(job_id, |entry| entry.apply(progress)).await
    }

    async fn set_status(&self, job_id: JobId, status: JobStatus) -> AppResult<()> {
        self.modify(job_id, |entry| entry.status = Some(status)).await
    }

    async fn set_error(&self, job_id: JobId, message: &str) -> AppResult<()> {
        self.modify(job_id, |entry| {
            entry.status = Some(JobStatus::Error);
            entry.append_error(message);
        })
        .await
    }

    async fn get(&self, job_id: JobId) -> AppResult<Option<CachedProgress>> {
        self.cache.get_json(&keys::job_progress(job_id)).await
    }

    async fn delete(&self, job_ids: &[JobId]) -> AppResult<()> {
        let keys: Vec<String> = job_ids.iter().map(|id| keys::job_progress(*id)).collect();
        self.cache.delete_many(&keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use shift_core::config::CacheConfig;

    use super::*;

    async fn make_cache() -> CachedJobProgress {
        let manager = CacheManager::new(&CacheConfig::default()).await.unwrap();
        CachedJobProgress::new(manager, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_progress_creates_running_entry() {
        let cache = make_cache().await;
        let id = JobId::new();
        cache
            .set_progress(id, &ProgressInfo::percent(25).with_note("reading"))
            .await
            .unwrap();

        let entry = cache.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Some(JobStatus::Running));
        assert_eq!(entry.percent, Some(25));
        assert_eq!(entry.note.as_deref(), Some("reading"));
    }

    #[tokio::test]
    async fn test_status_keeps_progress() {
        let cache = make_cache().await;
        let id = JobId::new();
        cache.set_progress(id, &ProgressInfo::percent(80)).await.unwrap();
        cache.set_status(id, JobStatus::Stopped).await.unwrap();

        let entry = cache.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Some(JobStatus::Stopped));
        assert_eq!(entry.percent, Some(80));
    }

    #[tokio::test]
    async fn test_errors_accumulate() {
        let cache = make_cache().await;
        let id = JobId::new();
        cache.set_error(id, "disk full").await.unwrap();
        cache.set_error(id, "retry failed").await.unwrap();

        let entry = cache.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Some(JobStatus::Error));
        assert_eq!(entry.error.as_deref(), Some("disk full\nretry failed"));
    }

    #[tokio::test]
    async fn test_delete_many() {
        let cache = make_cache().await;
        let a = JobId::new();
        let b = JobId::new();
        cache.set_status(a, JobStatus::Running).await.unwrap();
        cache.set_status(b, JobStatus::Running).await.unwrap();

        cache.delete(&[a, b]).await.unwrap();
        assert!(cache.get(a).await.unwrap().is_none());
        assert!(cache.get(b).await.unwrap().is_none());
    }
}
