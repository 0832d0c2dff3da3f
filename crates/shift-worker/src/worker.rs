//! Worker: claims runnable jobs, dispatches them, and acts on stop, pause,
//! and continue commands for the jobs it owns.
//!
//! A worker is one claimant identity (`"{process_id}-{index}"`). Several
//! workers may share a process and many processes may share a store; the
//! store's conditional claim is the only coordination between them.

use std::sync::Arc;
use std::time::Duration;

use shift_cache::ProgressCache;
use shift_core::config::ServerConfig;
use shift_core::error::{AppError, ErrorKind};
use shift_core::result::AppResult;
use shift_core::traits::ParameterCipher;
use shift_core::types::JobId;
use shift_database::JobStore;
use shift_entity::job::{Job, JobCommand, JobStatus};

use crate::context::{CancelRequest, ExecutionContexts};
use crate::registry::{HandlerRegistry, JobArguments, JobHandler};

/// Tunables a worker reads on every poll and sweep.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum jobs this worker runs at once.
    pub max_runnable_jobs: usize,
    /// Minimum time between durable progress writes for one job.
    pub progress_store_interval: Duration,
    /// How long a finished job's cached progress stays visible.
    pub progress_cache_eviction: Duration,
    /// Retention period for the cleanup purge.
    pub auto_delete_period: Option<Duration>,
    /// Statuses the purge may delete. `None` selects unstarted jobs.
    pub auto_delete_statuses: Vec<Option<JobStatus>>,
}

impl WorkerSettings {
    /// Build settings from the `server` configuration section.
    pub fn from_config(config: &ServerConfig) -> AppResult<Self> {
        let auto_delete_statuses = config
            .auto_delete_statuses
            .iter()
            .map(|s| JobStatus::parse_filter(s))
            .collect::<AppResult<Vec<_>>>()?;
        if auto_delete_statuses.contains(&Some(JobStatus::Running)) {
            return Err(AppError::configuration(
                "server.auto_delete_statuses must not include running",
            ));
        }

        Ok(Self {
            max_runnable_jobs: config.max_runnable_jobs,
            progress_store_interval: config.progress_store_interval(),
            progress_cache_eviction: config.progress_cache_eviction(),
            auto_delete_period: config.auto_delete_period(),
            auto_delete_statuses,
        })
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_runnable_jobs: 10,
            progress_store_interval: Duration::from_secs(10),
            progress_cache_eviction: Duration::from_secs(60),
            auto_delete_period: None,
            auto_delete_statuses: vec![Some(JobStatus::Completed)],
        }
    }
}

/// A single claimant of jobs.
#[derive(Debug, Clone)]
pub struct Worker {
    pub(crate) process_id: Arc<str>,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) cache: Arc<dyn ProgressCache>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) cipher: Arc<dyn ParameterCipher>,
    pub(crate) contexts: ExecutionContexts,
    pub(crate) settings: Arc<WorkerSettings>,
}

impl Worker {
    /// Create a worker claiming jobs as `process_id`.
    pub fn new(
        process_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn ProgressCache>,
        registry: Arc<HandlerRegistry>,
        cipher: Arc<dyn ParameterCipher>,
        settings: WorkerSettings,
    ) -> Self {
        let process_id: String = process_id.into();
        Self {
            process_id: process_id.into(),
            store,
            cache,
            registry,
            cipher,
            contexts: ExecutionContexts::new(),
            settings: Arc::new(settings),
        }
    }

    /// Claimant identity written to `process_id` on owned jobs.
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// This worker's execution context table.
    pub fn contexts(&self) -> &ExecutionContexts {
        &self.contexts
    }

    /// Claim and dispatch as many runnable jobs as capacity allows.
    /// Returns the ids this worker claimed.
    pub async fn run_jobs(&self) -> AppResult<Vec<JobId>> {
        let running = self.store.count_running(&self.process_id).await? as usize;
        let available = self.settings.max_runnable_jobs.saturating_sub(running);
        if available == 0 {
            tracing::debug!(
                worker_id = %self.process_id,
                running,
                "Worker at capacity, skipping poll"
            );
            return Ok(Vec::new());
        }

        let candidates = self.store.get_runnable_jobs(available).await?;
        self.claim_and_dispatch(candidates).await
    }

    /// Claim and dispatch the given jobs regardless of capacity. Jobs that
    /// have already started are skipped.
    pub async fn run_selected_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<JobId>> {
        let candidates = self.store.get_non_running_jobs(job_ids).await?;
        self.claim_and_dispatch(candidates).await
    }

    async fn claim_and_dispatch(&self, candidates: Vec<Job>) -> AppResult<Vec<JobId>> {
        let mut claimed = Vec::with_capacity(candidates.len());
        for job in candidates {
            match self.store.claim_job(&self.process_id, job.job_id).await {
                Ok(true) => claimed.push(job),
                Ok(false) => {
                    tracing::debug!(
                        worker_id = %self.process_id,
                        job_id = %job.job_id,
                        "Claim lost to another worker"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        worker_id = %self.process_id,
                        job_id = %job.job_id,
                        error = %e,
                        "Failed to claim job"
                    );
                }
            }
        }

        let ids: Vec<JobId> = claimed.iter().map(|job| job.job_id).collect();
        if !ids.is_empty() {
            tracing::info!(worker_id = %self.process_id, count = ids.len(), "Claimed jobs");
        }
        for job in claimed {
            self.dispatch(job).await;
        }
        Ok(ids)
    }

    /// Decrypt and decode arguments and resolve the handler.
    fn prepare(&self, job: &Job) -> AppResult<(Arc<dyn JobHandler>, JobArguments)> {
        let handler = self.registry.resolve(&job.invoke_meta)?;
        let parameters = self.cipher.decrypt(&job.parameters).map_err(|e| {
            AppError::with_source(
                ErrorKind::Encryption,
                format!("Failed to decrypt job arguments: {}", e.message),
                e,
            )
        })?;
        let args = self
            .registry
            .deserialize_arguments(handler.as_ref(), &parameters)?;
        Ok((handler, args))
    }

    /// Start executing a claimed job. The context is registered before the
    /// execution task is spawned.
    async fn dispatch(&self, job: Job) {
        let job_id = job.job_id;
        let (handler, args) = match self.prepare(&job) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(
                    worker_id = %self.process_id,
                    job_id = %job_id,
                    error = %e,
                    "Job dispatch failed"
                );
                let message = e.to_string();
                if let Err(e) = self.store.set_error(&self.process_id, job_id, &message).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record dispatch error");
                }
                if let Err(e) = self.cache.set_error(job_id, &message).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to cache dispatch error");
                }
                return;
            }
        };

        let Some(handle) = self.contexts.register(job_id, handler.declares_pause()) else {
            tracing::warn!(
                worker_id = %self.process_id,
                job_id = %job_id,
                "Job already executing in this worker, skipping dispatch"
            );
            return;
        };

        let worker = self.clone();
        tokio::spawn(async move {
            worker.execute(job, handler, args, handle).await;
        });
    }

    /// Act on stop commands for jobs this worker owns or nobody owns.
    ///
    /// A live execution has its cancellation raised and keeps its status
    /// until it unwinds; a job with no execution here is marked stopped.
    /// Either way the command and the cached progress are cleared.
    pub async fn stop_jobs(&self) -> AppResult<usize> {
        let job_ids = self
            .store
            .get_job_ids_by_owner_and_command(&self.process_id, JobCommand::Stop)
            .await?;
        if job_ids.is_empty() {
            return Ok(0);
        }

        let mut signalled = Vec::new();
        let mut idle = Vec::new();
        for job_id in &job_ids {
            match self.contexts.cancel(*job_id) {
                CancelRequest::Cancelled => {
                    tracing::info!(worker_id = %self.process_id, job_id = %job_id, "Cancellation raised");
                    signalled.push(*job_id);
                }
                CancelRequest::AlreadyCancelled => signalled.push(*job_id),
                CancelRequest::NotRunning => idle.push(*job_id),
            }
        }

        self.store.clear_command(&signalled).await?;
        let stopped = self.store.set_stopped(&idle).await?;
        if stopped > 0 {
            tracing::info!(worker_id = %self.process_id, count = stopped, "Stopped idle jobs");
        }
        if let Err(e) = self.cache.delete(&job_ids).await {
            tracing::warn!(worker_id = %self.process_id, error = %e, "Failed to clear cached progress");
        }
        Ok(job_ids.len())
    }

    /// Pause running jobs flagged with a pause command. Only executions
    /// whose handler declares pause support are affected.
    pub async fn pause_jobs(&self) -> AppResult<Vec<JobId>> {
        let job_ids = self
            .store
            .get_job_ids_by_owner_and_command(&self.process_id, JobCommand::Pause)
            .await?;
        let paused: Vec<JobId> = job_ids
            .into_iter()
            .filter(|id| self.contexts.pause(*id))
            .collect();
        if paused.is_empty() {
            return Ok(paused);
        }

        self.store.set_paused(&paused).await?;
        for job_id in &paused {
            if let Err(e) = self.cache.set_status(*job_id, JobStatus::Paused).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to cache paused status");
            }
        }
        tracing::info!(worker_id = %self.process_id, count = paused.len(), "Paused jobs");
        Ok(paused)
    }

    /// Resume paused jobs flagged with a continue command.
    pub async fn continue_jobs(&self) -> AppResult<Vec<JobId>> {
        let job_ids = self
            .store
            .get_job_ids_by_owner_and_command(&self.process_id, JobCommand::Continue)
            .await?;
        let resumed: Vec<JobId> = job_ids
            .into_iter()
            .filter(|id| self.contexts.resume(*id))
            .collect();
        if resumed.is_empty() {
            return Ok(resumed);
        }

        self.store.set_resumed(&resumed).await?;
        for job_id in &resumed {
            if let Err(e) = self.cache.set_status(*job_id, JobStatus::Running).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to cache running status");
            }
        }
        tracing::info!(worker_id = %self.process_id, count = resumed.len(), "Resumed jobs");
        Ok(resumed)
    }

    /// Flag every running or paused job this worker owns with a stop
    /// command. Used when shutting down.
    pub async fn stop_all_running_jobs(&self) -> AppResult<u64> {
        let mut job_ids: Vec<JobId> = Vec::new();
        for status in [JobStatus::Running, JobStatus::Paused] {
            let jobs = self
                .store
                .get_jobs_by_owner_and_status(&self.process_id, status)
                .await?;
            job_ids.extend(jobs.iter().map(|job| job.job_id));
        }
        self.store.set_command(&job_ids, JobCommand::Stop).await
    }

    /// Wait until every execution currently in flight has unwound.
    pub async fn wait_idle(&self) {
        self.contexts.wait_finished().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use shift_cache::ProgressCache;
    use shift_core::config::ServerConfig;
    use shift_core::error::ErrorKind;
    use shift_core::traits::PlaintextCipher;
    use shift_database::JobStore;
    use shift_entity::job::{InvokeMeta, JobCommand, JobStatus, NewJob};

    use super::{Worker, WorkerSettings};
    use crate::testing::{
        Harness, RejectingCipher, UnstartableStore, backends, test_registry, wait_for,
        wait_for_job_status, wait_for_status,
    };

    fn new_job(type_name: &str, method: &str) -> NewJob {
        NewJob {
            app_id: None,
            user_id: None,
            job_type: None,
            job_name: None,
            invoke_meta: InvokeMeta::new(type_name, method, Vec::new()),
            parameters: "[]".to_string(),
        }
    }

    #[test]
    fn test_settings_reject_running_purge() {
        let config = ServerConfig {
            auto_delete_statuses: vec!["completed".into(), "running".into()],
            ..Default::default()
        };
        let err = WorkerSettings::from_config(&config).unwrap_err();
        assert!(err.is(ErrorKind::Configuration));

        let config = ServerConfig {
            auto_delete_statuses: vec!["completed".into(), "none".into()],
            ..Default::default()
        };
        let settings = WorkerSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.auto_delete_statuses,
            vec![Some(JobStatus::Completed), None]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_jobs_completes_job() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "quick").await;

        let claimed = h.worker.run_jobs().await.unwrap();
        assert_eq!(claimed, vec![id]);

        let job = wait_for_status(&h, id, JobStatus::Completed).await;
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_some());
        assert!(job.command.is_none());
        let progress = h.store.get_progress(id).await.unwrap().unwrap();
        assert_eq!(progress.percent, Some(100));
        wait_for(|| async { h.worker.contexts().is_empty() }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_jobs_respects_capacity() {
        let h = Harness::new(2).await;
        let ids = [
            h.add("Test", "sleepy").await,
            h.add("Test", "sleepy").await,
            h.add("Test", "sleepy").await,
        ];

        let first = h.worker.run_jobs().await.unwrap();
        assert_eq!(first.len(), 2);
        for id in &first {
            wait_for_status(&h, *id, JobStatus::Running).await;
        }

        let second = h.worker.run_jobs().await.unwrap();
        assert!(second.is_empty());
        let waiting: Vec<_> = ids.iter().filter(|id| !first.contains(id)).collect();
        assert_eq!(waiting.len(), 1);
        let third = h.store.get_job(*waiting[0]).await.unwrap().unwrap();
        assert!(third.process_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_selected_jobs_bypasses_capacity() {
        let h = Harness::new(1).await;
        let busy = h.add("Test", "sleepy").await;
        h.worker.run_jobs().await.unwrap();
        wait_for_status(&h, busy, JobStatus::Running).await;

        let extra = h.add("Test", "sleepy").await;
        let claimed = h.worker.run_selected_jobs(&[extra, busy]).await.unwrap();
        assert_eq!(claimed, vec![extra]);
        wait_for_status(&h, extra, JobStatus::Running).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_marks_error() {
        let h = Harness::new(10).await;
        let unknown = h.add("Missing", "handler").await;

        h.worker.run_jobs().await.unwrap();

        let job = h.store.get_job(unknown).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Error));
        assert!(job.error.unwrap().contains("No handler registered"));
        assert!(!h.worker.contexts().contains(unknown));

        // Not retried on the next poll.
        assert!(h.worker.run_jobs().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrypt_failure_is_encryption_error() {
        let (store, cache) = backends().await;
        let worker = Worker::new(
            "test-0",
            store.clone(),
            cache.clone(),
            Arc::new(test_registry()),
            Arc::new(RejectingCipher),
            WorkerSettings::default(),
        );
        let id = store.add(new_job("Test", "quick")).await.unwrap();

        worker.run_jobs().await.unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Error));
        let error = job.error.unwrap();
        assert!(error.starts_with("ENCRYPTION"));
        assert!(error.contains("key rotated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_marks_error() {
        let (_, cache) = backends().await;
        let store = Arc::new(UnstartableStore::default());
        let worker = Worker::new(
            "test-0",
            store.clone(),
            cache.clone(),
            Arc::new(test_registry()),
            Arc::new(PlaintextCipher),
            WorkerSettings::default(),
        );
        let id = store.add(new_job("Test", "quick")).await.unwrap();

        assert_eq!(worker.run_jobs().await.unwrap(), vec![id]);

        let job = wait_for_job_status(store.as_ref(), id, JobStatus::Error).await;
        assert!(job.error.unwrap().contains("connection reset"));
        wait_for(|| async { worker.contexts().is_empty() }).await;
        let cached = cache.get(id).await.unwrap().unwrap();
        assert_eq!(cached.status, Some(JobStatus::Error));
        assert!(worker.run_jobs().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_fault_appends_error() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "failing").await;

        h.worker.run_jobs().await.unwrap();
        let job = wait_for_status(&h, id, JobStatus::Error).await;
        assert_eq!(job.error.as_deref(), Some("boom"));

        let cached = h.cache.get(id).await.unwrap().unwrap();
        assert_eq!(cached.status, Some(JobStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_is_a_fault() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "panicking").await;

        h.worker.run_jobs().await.unwrap();
        let job = wait_for_status(&h, id, JobStatus::Error).await;
        assert!(job.error.unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_stop_ends_stopped() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "sleepy").await;
        h.worker.run_jobs().await.unwrap();
        wait_for_status(&h, id, JobStatus::Running).await;

        h.client.set_command_stop(&[id]).await.unwrap();
        assert_eq!(h.worker.stop_jobs().await.unwrap(), 1);

        let job = wait_for_status(&h, id, JobStatus::Stopped).await;
        assert!(job.command.is_none());
        assert!(job.error.is_none());
        wait_for(|| async { !h.worker.contexts().contains(id) }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_execution_marks_stopped() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "sleepy").await;
        h.client.set_command_stop(&[id]).await.unwrap();

        h.worker.stop_jobs().await.unwrap();

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Stopped));
        assert!(job.command.is_none());
        assert!(job.ended_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_continue() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "sleepy").await;
        h.worker.run_jobs().await.unwrap();
        wait_for_status(&h, id, JobStatus::Running).await;

        h.client.set_command_pause(&[id]).await.unwrap();
        assert_eq!(h.worker.pause_jobs().await.unwrap(), vec![id]);
        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Paused));
        assert!(job.command.is_none());

        h.client.set_command_continue(&[id]).await.unwrap();
        assert_eq!(h.worker.continue_jobs().await.unwrap(), vec![id]);
        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_ignored_without_capability() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "stubborn").await;
        h.worker.run_jobs().await.unwrap();
        wait_for_status(&h, id, JobStatus::Running).await;

        h.client.set_command_pause(&[id]).await.unwrap();
        assert!(h.worker.pause_jobs().await.unwrap().is_empty());

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Running));
        assert_eq!(job.command, Some(JobCommand::Pause));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_running_jobs_flags_owned_jobs() {
        let h = Harness::new(10).await;
        let id = h.add("Test", "sleepy").await;
        h.worker.run_jobs().await.unwrap();
        wait_for_status(&h, id, JobStatus::Running).await;

        assert_eq!(h.worker.stop_all_running_jobs().await.unwrap(), 1);
        h.worker.stop_jobs().await.unwrap();
        wait_for_status(&h, id, JobStatus::Stopped).await;

        tokio::time::timeout(Duration::from_secs(5), h.worker.wait_idle())
            .await
            .expect("executions drained");
    }
}
