//! Client API: enqueue jobs, issue commands, and read status and progress.

use std::sync::Arc;

use serde_json::Value;

use shift_cache::ProgressCache;
use shift_core::result::AppResult;
use shift_core::traits::ParameterCipher;
use shift_core::types::{JobId, PageRequest, PageResponse};
use shift_database::JobStore;
use shift_entity::job::{
    CachedProgress, InvokeMeta, Job, JobCommand, JobStatusCount, JobView, NewJob,
};

/// A job to enqueue, built up with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct JobRequest {
    type_name: String,
    method: String,
    parameter_types: Vec<String>,
    arguments: Vec<Value>,
    app_id: Option<String>,
    user_id: Option<String>,
    job_type: Option<String>,
    job_name: Option<String>,
}

impl JobRequest {
    /// Target `type_name::method` with no arguments.
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            arguments: Vec::new(),
            app_id: None,
            user_id: None,
            job_type: None,
            job_name: None,
        }
    }

    /// Append an argument and its declared type.
    pub fn arg(mut self, parameter_type: impl Into<String>, value: Value) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.arguments.push(value);
        self
    }

    /// Set the owning application.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the owning user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the free-form job type.
    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Set the human-readable name.
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    fn into_new_job(self, cipher: &dyn ParameterCipher) -> AppResult<NewJob> {
        let serialized = if self.arguments.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.arguments)?
        };
        Ok(NewJob {
            app_id: self.app_id,
            user_id: self.user_id,
            job_type: self.job_type,
            job_name: self.job_name,
            invoke_meta: InvokeMeta::new(self.type_name, self.method, self.parameter_types),
            parameters: cipher.encrypt(&serialized)?,
        })
    }
}

/// Front door for applications that enqueue and manage jobs.
#[derive(Debug, Clone)]
pub struct JobClient {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn ProgressCache>,
    cipher: Arc<dyn ParameterCipher>,
}

impl JobClient {
    /// Create a client over the given store, cache, and cipher.
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn ProgressCache>,
        cipher: Arc<dyn ParameterCipher>,
    ) -> Self {
        Self {
            store,
            cache,
            cipher,
        }
    }

    /// Enqueue a job. It starts with no status and waits to be claimed.
    pub async fn add(&self, request: JobRequest) -> AppResult<JobId> {
        let job = request.into_new_job(self.cipher.as_ref())?;
        let key = job.invoke_meta.key();
        let job_id = self.store.add(job).await?;
        tracing::info!(job_id = %job_id, handler = %key, "Job added");
        Ok(job_id)
    }

    /// Replace a non-running job's target and arguments. Run state and
    /// progress are cleared. Returns `false` if the job is running or absent.
    pub async fn update(&self, job_id: JobId, request: JobRequest) -> AppResult<bool> {
        let job = request.into_new_job(self.cipher.as_ref())?;
        let updated = self.store.update(job_id, job).await? > 0;
        if updated {
            self.evict(&[job_id]).await;
        }
        Ok(updated)
    }

    /// Ask running, paused, or unstarted jobs to stop.
    pub async fn set_command_stop(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.set_command(job_ids, JobCommand::Stop).await
    }

    /// Move unclaimed jobs to the front of the queue.
    pub async fn set_command_run_now(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.set_command(job_ids, JobCommand::RunNow).await
    }

    /// Ask running jobs to pause.
    pub async fn set_command_pause(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.set_command(job_ids, JobCommand::Pause).await
    }

    /// Ask paused jobs to continue.
    pub async fn set_command_continue(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.set_command(job_ids, JobCommand::Continue).await
    }

    async fn set_command(&self, job_ids: &[JobId], command: JobCommand) -> AppResult<u64> {
        let affected = self.store.set_command(job_ids, command).await?;
        tracing::info!(command = %command, requested = job_ids.len(), affected, "Command issued");
        Ok(affected)
    }

    /// Clear run state of non-running jobs so they run again.
    pub async fn reset(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let affected = self.store.reset(job_ids).await?;
        self.evict(job_ids).await;
        Ok(affected)
    }

    /// Delete non-running jobs.
    pub async fn delete(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let affected = self.store.delete(job_ids).await?;
        self.evict(job_ids).await;
        Ok(affected)
    }

    /// Fetch a job.
    pub async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.store.get_job(job_id).await
    }

    /// Latest status and progress. The cache is consulted first; on a miss
    /// or a cache failure the store's job and progress row are used.
    pub async fn get_progress(&self, job_id: JobId) -> AppResult<Option<CachedProgress>> {
        match self.cache.get(job_id).await {
            Ok(Some(cached)) => return Ok(Some(cached)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Progress cache read failed, using store");
            }
        }
        let view = self.store.get_job_view(job_id).await?;
        Ok(view.as_ref().map(CachedProgress::from))
    }

    /// Job counts per status, optionally filtered by app and user.
    pub async fn status_counts(
        &self,
        app_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<JobStatusCount> {
        self.store.status_counts(app_id, user_id).await
    }

    /// Page through jobs with their latest progress.
    pub async fn list_jobs(&self, page: &PageRequest) -> AppResult<PageResponse<JobView>> {
        self.store.list_jobs(page).await
    }

    async fn evict(&self, job_ids: &[JobId]) {
        if let Err(e) = self.cache.delete(job_ids).await {
            tracing::warn!(error = %e, "Failed to clear cached progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shift_entity::job::{JobCommand, JobStatus, ProgressInfo};

    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_add_serializes_arguments() {
        let h = Harness::new(10).await;
        let id = h
            .client
            .add(
                JobRequest::new("Report", "build")
                    .arg("string", json!("monthly"))
                    .arg("i32", json!(3))
                    .with_app_id("billing")
                    .with_job_name("Monthly report"),
            )
            .await
            .unwrap();

        let job = h.client.get_job(id).await.unwrap().unwrap();
        assert!(job.status.is_none());
        assert!(job.process_id.is_none());
        assert_eq!(job.invoke_meta.key(), "Report::build");
        assert_eq!(job.invoke_meta.parameter_types, vec!["string", "i32"]);
        assert_eq!(job.parameters, r#"["monthly",3]"#);
        assert_eq!(job.app_id.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_commands_respect_state() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "quick").await;

        assert_eq!(h.client.set_command_pause(&[id]).await.unwrap(), 0);
        assert_eq!(h.client.set_command_continue(&[id]).await.unwrap(), 0);
        assert_eq!(h.client.set_command_run_now(&[id]).await.unwrap(), 1);
        let job = h.client.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.command, Some(JobCommand::RunNow));
    }

    #[tokio::test]
    async fn test_update_retargets_job() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "quick").await;

        let updated = h
            .client
            .update(id, JobRequest::new("Test", "failing"))
            .await
            .unwrap();
        assert!(updated);
        let job = h.client.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.invoke_meta.method, "failing");
    }

    #[tokio::test]
    async fn test_get_progress_prefers_cache() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "quick").await;
        h.store
            .upsert_progress(id, &ProgressInfo::percent(10))
            .await
            .unwrap();
        h.cache
            .set_progress(id, &ProgressInfo::percent(40))
            .await
            .unwrap();

        let progress = h.client.get_progress(id).await.unwrap().unwrap();
        assert_eq!(progress.percent, Some(40));
        assert_eq!(progress.status, Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn test_get_progress_falls_back_to_store() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "quick").await;
        h.store
            .upsert_progress(id, &ProgressInfo::percent(10).with_note("warming up"))
            .await
            .unwrap();

        let progress = h.client.get_progress(id).await.unwrap().unwrap();
        assert_eq!(progress.percent, Some(10));
        assert_eq!(progress.note.as_deref(), Some("warming up"));
        assert!(progress.status.is_none());

        assert!(h.client.get_progress(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_counts() {
        let h = Harness::new(10).await;
        let a = h.add("Test", "quick").await;
        h.add("Test", "quick").await;

        let counts = h.client.status_counts(None, None).await.unwrap();
        assert_eq!(counts.not_started, 2);
        assert_eq!(counts.total, 2);

        assert_eq!(h.client.delete(&[a]).await.unwrap(), 1);
        assert!(h.client.get_job(a).await.unwrap().is_none());

        let page = h.client.list_jobs(&PageRequest::new(1, 10)).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
