//! The job store seam shared by clients, workers, and the cleanup sweep.

use std::time::Duration;

use async_trait::async_trait;

use shift_core::result::AppResult;
use shift_core::types::JobId;
use shift_core::types::pagination::{PageRequest, PageResponse};
use shift_entity::job::{
    Job, JobCommand, JobProgress, JobStatus, JobStatusCount, JobView, NewJob, ProgressInfo,
};

/// Durable job and progress records.
///
/// Every state transition a worker performs is a conditional update: the
/// methods return the number of rows they actually changed so callers can
/// tell a lost race from a successful write. Claiming is the only
/// ownership transfer and succeeds for exactly one caller per job.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a new, unstarted job and return its id.
    async fn add(&self, job: NewJob) -> AppResult<JobId>;

    /// Re-target a job that is not running. Clears run state and progress.
    async fn update(&self, job_id: JobId, job: NewJob) -> AppResult<u64>;

    /// Unstarted, unowned jobs without a blocking command, run-now first,
    /// then oldest first, ties broken by id.
    async fn get_runnable_jobs(&self, limit: usize) -> AppResult<Vec<Job>>;

    /// Take ownership of an unstarted, unowned job that no stop, pause, or
    /// continue command holds back. `false` means another process won the
    /// race or the job is no longer runnable.
    async fn claim_job(&self, process_id: &str, job_id: JobId) -> AppResult<bool>;

    /// Fetch a single job.
    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>>;

    /// Fetch the given jobs. Missing ids are skipped.
    async fn get_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>>;

    /// Fetch the given jobs that have not started yet.
    async fn get_non_running_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>>;

    /// Jobs owned by `process_id` with the given status.
    async fn get_jobs_by_owner_and_status(
        &self,
        process_id: &str,
        status: JobStatus,
    ) -> AppResult<Vec<Job>>;

    /// Ids of jobs carrying `command` that are owned by `process_id` or not
    /// owned by anyone.
    async fn get_job_ids_by_owner_and_command(
        &self,
        process_id: &str,
        command: JobCommand,
    ) -> AppResult<Vec<JobId>>;

    /// Mark an owned, unstarted job as running and record its start time.
    async fn set_running(&self, process_id: &str, job_id: JobId) -> AppResult<u64>;

    /// Mark an owned job as completed, clear its command, and record its end.
    async fn set_completed(&self, process_id: &str, job_id: JobId) -> AppResult<u64>;

    /// Mark an owned job as failed and append `message` to its error text.
    async fn set_error(&self, process_id: &str, job_id: JobId, message: &str) -> AppResult<u64>;

    /// Mark an owned job that is still running as failed and append
    /// `message` to its error text. Jobs that already reached another
    /// state are left alone.
    async fn fail_running(&self, process_id: &str, job_id: JobId, message: &str) -> AppResult<u64>;

    /// Mark unstarted, running, or paused jobs as stopped, clear their
    /// command, and record their end.
    async fn set_stopped(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Mark jobs as paused and clear their command.
    async fn set_paused(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Mark paused jobs as running again and clear their command.
    async fn set_resumed(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Clear the command on the given jobs.
    async fn clear_command(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Record `command` on the jobs whose state accepts it.
    async fn set_command(&self, job_ids: &[JobId], command: JobCommand) -> AppResult<u64>;

    /// Number of running jobs owned by `process_id`.
    async fn count_running(&self, process_id: &str) -> AppResult<u64>;

    /// Delete jobs created more than `period` ago whose status is in
    /// `statuses`. `None` in the list selects jobs that never started.
    /// Running jobs are never deleted.
    async fn delete_older_than(
        &self,
        period: Duration,
        statuses: &[Option<JobStatus>],
    ) -> AppResult<u64>;

    /// Insert or replace the durable progress row for a job.
    async fn upsert_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()>;

    /// Fetch the durable progress row for a job.
    async fn get_progress(&self, job_id: JobId) -> AppResult<Option<JobProgress>>;

    /// Fetch a job together with its progress row.
    async fn get_job_view(&self, job_id: JobId) -> AppResult<Option<JobView>>;

    /// Return non-running jobs to the queue, clearing run state and progress.
    async fn reset(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Delete non-running jobs and their progress.
    async fn delete(&self, job_ids: &[JobId]) -> AppResult<u64>;

    /// Count jobs per status, optionally filtered by app and user.
    async fn status_counts(
        &self,
        app_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<JobStatusCount>;

    /// List jobs newest first with their progress.
    async fn list_jobs(&self, page: &PageRequest) -> AppResult<PageResponse<JobView>>;
}
