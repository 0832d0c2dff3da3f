//! Shared fixtures for worker tests: in-memory backends, a set of test
//! handlers, and polling helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use shift_cache::{CacheManager, CachedJobProgress};
use shift_core::config::CacheConfig;
use shift_core::error::{AppError, ErrorKind};
use shift_core::result::AppResult;
use shift_core::traits::{ParameterCipher, PlaintextCipher};
use shift_core::types::JobId;
use shift_core::types::pagination::{PageRequest, PageResponse};
use shift_database::{JobStore, MemoryJobStore};
use shift_entity::job::{
    InvokeMeta, Job, JobCommand, JobProgress, JobStatus, JobStatusCount, JobView, NewJob,
    ProgressInfo,
};

use crate::client::{JobClient, JobRequest};
use crate::registry::{HandlerRegistry, JobArguments, JobContext, JobError, JobHandler};
use crate::worker::{Worker, WorkerSettings};

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Quick,
    Sleepy,
    Stubborn,
    Failing,
    Panicking,
}

#[derive(Debug)]
struct TestHandler {
    method: &'static str,
    behaviour: Behaviour,
}

#[async_trait]
impl JobHandler for TestHandler {
    fn type_name(&self) -> &str {
        "Test"
    }

    fn method(&self) -> &str {
        self.method
    }

    fn declares_pause(&self) -> bool {
        matches!(self.behaviour, Behaviour::Sleepy)
    }

    async fn execute(&self, mut ctx: JobContext, _args: JobArguments) -> Result<(), JobError> {
        match self.behaviour {
            Behaviour::Quick => {
                ctx.report(ProgressInfo::percent(50));
                ctx.report(ProgressInfo::percent(100).with_note("done"));
                Ok(())
            }
            Behaviour::Sleepy => loop {
                ctx.checkpoint().await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
            Behaviour::Stubborn => loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
            Behaviour::Failing => Err(JobError::Failed("boom".to_string())),
            Behaviour::Panicking => panic!("handler exploded"),
        }
    }
}

/// Registry with every `Test::*` handler.
pub(crate) fn test_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (method, behaviour) in [
        ("quick", Behaviour::Quick),
        ("sleepy", Behaviour::Sleepy),
        ("stubborn", Behaviour::Stubborn),
        ("failing", Behaviour::Failing),
        ("panicking", Behaviour::Panicking),
    ] {
        registry.register(Arc::new(TestHandler { method, behaviour }));
    }
    registry
}

/// In-memory job store and progress cache.
pub(crate) async fn backends() -> (Arc<MemoryJobStore>, Arc<CachedJobProgress>) {
    let cache = CacheManager::new(&CacheConfig::default())
        .await
        .expect("memory cache");
    (
        Arc::new(MemoryJobStore::new()),
        Arc::new(CachedJobProgress::new(cache, Duration::from_secs(3600))),
    )
}

/// Cipher whose decryption always fails.
#[derive(Debug)]
pub(crate) struct RejectingCipher;

impl ParameterCipher for RejectingCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, _ciphertext: &str) -> AppResult<String> {
        Err(AppError::encryption("key rotated"))
    }
}

/// Memory store whose `set_running` always fails.
#[derive(Debug, Default)]
pub(crate) struct UnstartableStore {
    pub inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for UnstartableStore {
    async fn add(&self, job: NewJob) -> AppResult<JobId> {
        self.inner.add(job).await
    }

    async fn update(&self, job_id: JobId, job: NewJob) -> AppResult<u64> {
        self.inner.update(job_id, job).await
    }

    async fn get_runnable_jobs(&self, limit: usize) -> AppResult<Vec<Job>> {
        self.inner.get_runnable_jobs(limit).await
    }

    async fn claim_job(&self, process_id: &str, job_id: JobId) -> AppResult<bool> {
        self.inner.claim_job(process_id, job_id).await
    }

    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.inner.get_job(job_id).await
    }

    async fn get_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        self.inner.get_jobs(job_ids).await
    }

    async fn get_non_running_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        self.inner.get_non_running_jobs(job_ids).await
    }

    async fn get_jobs_by_owner_and_status(
        &self,
        process_id: &str,
        status: JobStatus,
    ) -> AppResult<Vec<Job>> {
        self.inner.get_jobs_by_owner_and_status(process_id, status).await
    }

    async fn get_job_ids_by_owner_and_command(
        &self,
        process_id: &str,
        command: JobCommand,
    ) -> AppResult<Vec<JobId>> {
        self.inner
            .get_job_ids_by_owner_and_command(process_id, command)
            .await
    }

    async fn set_running(&self, _process_id: &str, _job_id: JobId) -> AppResult<u64> {
        Err(AppError::new(ErrorKind::Database, "connection reset"))
    }

    async fn set_completed(&self, process_id: &str, job_id: JobId) -> AppResult<u64> {
        self.inner.set_completed(process_id, job_id).await
    }

    async fn set_error(&self, process_id: &str, job_id: JobId, message: &str) -> AppResult<u64> {
        self.inner.set_error(process_id, job_id, message).await
    }

    async fn fail_running(
        &self,
        process_id: &str,
        job_id: JobId,
        message: &str,
    ) -> AppResult<u64> {
        self.inner.fail_running(process_id, job_id, message).await
    }

    async fn set_stopped(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.set_stopped(job_ids).await
    }

    async fn set_paused(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.set_paused(job_ids).await
    }

    async fn set_resumed(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.set_resumed(job_ids).await
    }

    async fn clear_command(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.clear_command(job_ids).await
    }

    async fn set_command(&self, job_ids: &[JobId], command: JobCommand) -> AppResult<u64> {
        self.inner.set_command(job_ids, command).await
    }

    async fn count_running(&self, process_id: &str) -> AppResult<u64> {
        self.inner.count_running(process_id).await
    }

    async fn delete_older_than(
        &self,
        period: Duration,
        statuses: &[Option<JobStatus>],
    ) -> AppResult<u64> {
        self.inner.delete_older_than(period, statuses).await
    }

    async fn upsert_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()> {
        self.inner.upsert_progress(job_id, progress).await
    }

    async fn get_progress(&self, job_id: JobId) -> AppResult<Option<JobProgress>> {
        self.inner.get_progress(job_id).await
    }

    async fn get_job_view(&self, job_id: JobId) -> AppResult<Option<JobView>> {
        self.inner.get_job_view(job_id).await
    }

    async fn reset(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.reset(job_ids).await
    }

    async fn delete(&self, job_ids: &[JobId]) -> AppResult<u64> {
        self.inner.delete(job_ids).await
    }

    async fn status_counts(
        &self,
        app_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<JobStatusCount> {
        self.inner.status_counts(app_id, user_id).await
    }

    async fn list_jobs(&self, page: &PageRequest) -> AppResult<PageResponse<JobView>> {
        self.inner.list_jobs(page).await
    }
}

/// One worker wired to in-memory backends, plus a client over the same.
pub(crate) struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub cache: Arc<CachedJobProgress>,
    pub client: JobClient,
    pub worker: Worker,
}

impl Harness {
    pub async fn new(max_runnable_jobs: usize) -> Self {
        Self::with_settings(WorkerSettings {
            max_runnable_jobs,
            ..Default::default()
        })
        .await
    }

    pub async fn with_settings(settings: WorkerSettings) -> Self {
        let (store, cache) = backends().await;
        let cipher: Arc<dyn ParameterCipher> = Arc::new(PlaintextCipher);
        let worker = Worker::new(
            "test-0",
            store.clone(),
            cache.clone(),
            Arc::new(test_registry()),
            Arc::clone(&cipher),
            settings,
        );
        let client = JobClient::new(store.clone(), cache.clone(), cipher);
        Self {
            store,
            cache,
            client,
            worker,
        }
    }

    /// Enqueue a job with no arguments.
    pub async fn add(&self, type_name: &str, method: &str) -> JobId {
        self.client
            .add(JobRequest::new(type_name, method))
            .await
            .expect("add job")
    }

    /// Insert an unstarted job created `age` ago.
    pub async fn insert_aged(&self, type_name: &str, method: &str, age: chrono::Duration) -> JobId {
        let job_id = JobId::new();
        let new = NewJob {
            app_id: None,
            user_id: None,
            job_type: None,
            job_name: None,
            invoke_meta: InvokeMeta::new(type_name, method, Vec::new()),
            parameters: String::new(),
        };
        self.store
            .insert(Job::from_new(job_id, new, Utc::now() - age))
            .await;
        job_id
    }
}

/// Poll `condition` until it holds. Panics after ten seconds.
pub(crate) async fn wait_for<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Poll the store until the job reaches `status`.
pub(crate) async fn wait_for_job_status(store: &dyn JobStore, job_id: JobId, status: JobStatus) -> Job {
    wait_for(|| async {
        matches!(store.get_job(job_id).await, Ok(Some(job)) if job.status == Some(status))
    })
    .await;
    store
        .get_job(job_id)
        .await
        .expect("store read")
        .expect("job exists")
}

/// [`wait_for_job_status`] against a harness's store.
pub(crate) async fn wait_for_status(h: &Harness, job_id: JobId, status: JobStatus) -> Job {
    wait_for_job_status(h.store.as_ref(), job_id, status).await
}
