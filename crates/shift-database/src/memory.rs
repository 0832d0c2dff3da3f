//! In-process job store.
//!
//! Keeps jobs in a single mutex-guarded map and applies the same
//! conditional-update rules as the PostgreSQL store. Used for single-node
//! deployments and throughout the worker test suite.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use shift_core::error::{AppError, ErrorKind};
use shift_core::result::AppResult;
use shift_core::types::JobId;
use shift_core::types::pagination::{PageRequest, PageResponse};
use shift_entity::job::progress::append_error_text;
use shift_entity::job::{
    Job, JobCommand, JobProgress, JobStatus, JobStatusCount, JobView, NewJob, ProgressInfo,
};

use crate::store::JobStore;

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, Job>,
    progress: HashMap<JobId, JobProgress>,
}

impl State {
    /// Apply `f` to every listed job that exists, returning how many matched.
    fn update_each(&mut self, job_ids: &[JobId], mut f: impl FnMut(&mut Job) -> bool) -> u64 {
        let mut count = 0;
        for id in job_ids {
            if let Some(job) = self.jobs.get_mut(id) {
                if f(job) {
                    count += 1;
                }
            }
        }
        count
    }

    fn view(&self, job: &Job) -> JobView {
        JobView {
            job: job.clone(),
            progress: self.progress.get(&job.job_id).cloned(),
        }
    }
}

/// Job store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed job record, replacing any job with the same id.
    pub async fn insert(&self, job: Job) {
        self.state.lock().await.jobs.insert(job.job_id, job);
    }

    /// Remove a job and its progress regardless of status.
    pub async fn remove(&self, job_id: JobId) -> bool {
        let mut state = self.state.lock().await;
        state.progress.remove(&job_id);
        state.jobs.remove(&job_id).is_some()
    }
}

fn is_running(job: &Job) -> bool {
    job.status == Some(JobStatus::Running)
}

/// Unclaimed and not held back by a stop, pause, or continue command.
fn is_runnable(job: &Job) -> bool {
    job.is_unclaimed() && matches!(job.command, None | Some(JobCommand::RunNow))
}

fn owned_by(job: &Job, process_id: &str) -> bool {
    job.process_id.as_deref() == Some(process_id)
}

/// Oldest first, ties broken by id.
fn fifo(a: &Job, b: &Job) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.job_id.cmp(&b.job_id))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add(&self, job: NewJob) -> AppResult<JobId> {
        let job_id = JobId::new();
        let job = Job::from_new(job_id, job, Utc::now());
        self.state.lock().await.jobs.insert(job_id, job);
        Ok(job_id)
    }

    async fn update(&self, job_id: JobId, new: NewJob) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(0);
        };
        if is_running(job) {
            return Ok(0);
        }
        let created_at = job.created_at;
        *job = Job::from_new(job_id, new, created_at);
        state.progress.remove(&job_id);
        Ok(1)
    }

    async fn get_runnable_jobs(&self, limit: usize) -> AppResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut runnable: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| is_runnable(j))
            .cloned()
            .collect();
        runnable.sort_by(|a, b| {
            let a_now = a.command == Some(JobCommand::RunNow);
            let b_now = b.command == Some(JobCommand::RunNow);
            b_now.cmp(&a_now).then_with(|| fifo(a, b))
        });
        runnable.truncate(limit);
        Ok(runnable)
    }

    async fn claim_job(&self, process_id: &str, job_id: JobId) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if is_runnable(job) => {
                job.process_id = Some(process_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn get_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = job_ids
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect();
        jobs.sort_by(fifo);
        jobs.dedup_by_key(|j| j.job_id);
        Ok(jobs)
    }

    async fn get_non_running_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        let mut jobs = self.get_jobs(job_ids).await?;
        jobs.retain(|j| j.status.is_none());
        Ok(jobs)
    }

    async fn get_jobs_by_owner_and_status(
        &self,
        process_id: &str,
        status: JobStatus,
    ) -> AppResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| owned_by(j, process_id) && j.status == Some(status))
            .cloned()
            .collect();
        jobs.sort_by(fifo);
        Ok(jobs)
    }

    async fn get_job_ids_by_owner_and_command(
        &self,
        process_id: &str,
        command: JobCommand,
    ) -> AppResult<Vec<JobId>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| j.process_id.is_none() || owned_by(j, process_id))
            .filter(|j| j.command == Some(command))
            .collect();
        jobs.sort_by(|a, b| fifo(a, b));
        Ok(jobs.into_iter().map(|j| j.job_id).collect())
    }

    async fn set_running(&self, process_id: &str, job_id: JobId) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(&[job_id], |job| {
            if !owned_by(job, process_id) || job.status.is_some() {
                return false;
            }
            job.status = Some(JobStatus::Running);
            job.started_at = Some(Utc::now());
            true
        }))
    }

    async fn set_completed(&self, process_id: &str, job_id: JobId) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(&[job_id], |job| {
            if !owned_by(job, process_id) {
                return false;
            }
            job.status = Some(JobStatus::Completed);
            job.command = None;
            job.ended_at = Some(Utc::now());
            true
        }))
    }

    async fn set_error(&self, process_id: &str, job_id: JobId, message: &str) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(&[job_id], |job| {
            if !owned_by(job, process_id) {
                return false;
            }
            job.status = Some(JobStatus::Error);
            job.error = Some(append_error_text(job.error.take(), message));
            true
        }))
    }

    async fn fail_running(
        &self,
        process_id: &str,
        job_id: JobId,
        message: &str,
    ) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(&[job_id], |job| {
            if !owned_by(job, process_id) || !is_running(job) {
                return false;
            }
            job.status = Some(JobStatus::Error);
            job.error = Some(append_error_text(job.error.take(), message));
            true
        }))
    }

    async fn set_stopped(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(job_ids, |job| {
            if !JobCommand::Stop.applies_to(job.status, job.process_id.as_deref()) {
                return false;
            }
            job.status = Some(JobStatus::Stopped);
            job.command = None;
            job.ended_at = Some(Utc::now());
            true
        }))
    }

    async fn set_paused(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(job_ids, |job| {
            job.status = Some(JobStatus::Paused);
            job.command = None;
            true
        }))
    }

    async fn set_resumed(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(job_ids, |job| {
            if job.status != Some(JobStatus::Paused) {
                return false;
            }
            job.status = Some(JobStatus::Running);
            job.command = None;
            true
        }))
    }

    async fn clear_command(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(job_ids, |job| {
            job.command = None;
            true
        }))
    }

    async fn set_command(&self, job_ids: &[JobId], command: JobCommand) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.update_each(job_ids, |job| {
            if !command.applies_to(job.status, job.process_id.as_deref()) {
                return false;
            }
            job.command = Some(command);
            true
        }))
    }

    async fn count_running(&self, process_id: &str) -> AppResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| owned_by(j, process_id) && is_running(j))
            .count() as u64)
    }

    async fn delete_older_than(
        &self,
        period: Duration,
        statuses: &[Option<JobStatus>],
    ) -> AppResult<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let period = chrono::Duration::from_std(period).map_err(|e| {
            AppError::with_source(ErrorKind::Validation, "Retention period out of range", e)
        })?;
        let cutoff = Utc::now() - period;

        let mut state = self.state.lock().await;
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.created_at < cutoff && !is_running(j))
            .filter(|j| statuses.contains(&j.status))
            .map(|j| j.job_id)
            .collect();
        for id in &expired {
            state.jobs.remove(id);
            state.progress.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn upsert_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(AppError::not_found(format!("Job {job_id} not found")));
        }
        state.progress.insert(
            job_id,
            JobProgress {
                job_id,
                percent: progress.percent,
                note: progress.note.clone(),
                data: progress.data.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_progress(&self, job_id: JobId) -> AppResult<Option<JobProgress>> {
        Ok(self.state.lock().await.progress.get(&job_id).cloned())
    }

    async fn get_job_view(&self, job_id: JobId) -> AppResult<Option<JobView>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).map(|job| state.view(job)))
    }

    async fn reset(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let mut reset = Vec::new();
        let count = state.update_each(job_ids, |job| {
            if is_running(job) {
                return false;
            }
            job.reset_run_state();
            reset.push(job.job_id);
            true
        });
        for id in &reset {
            state.progress.remove(id);
        }
        Ok(count)
    }

    async fn delete(&self, job_ids: &[JobId]) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for id in job_ids {
            if state.jobs.get(id).is_some_and(|j| !is_running(j)) {
                state.jobs.remove(id);
                state.progress.remove(id);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn status_counts(
        &self,
        app_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<JobStatusCount> {
        let state = self.state.lock().await;
        let mut counts = JobStatusCount::default();
        state
            .jobs
            .values()
            .filter(|j| app_id.is_none_or(|a| j.app_id.as_deref() == Some(a)))
            .filter(|j| user_id.is_none_or(|u| j.user_id.as_deref() == Some(u)))
            .for_each(|j| counts.record(j.status, 1));
        Ok(counts)
    }

    async fn list_jobs(&self, page: &PageRequest) -> AppResult<PageResponse<JobView>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&Job> = state.jobs.values().collect();
        jobs.sort_by(|a, b| fifo(b, a));
        let total = jobs.len() as u64;
        let views = jobs
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|job| state.view(job))
            .collect();
        Ok(PageResponse::new(views, page.page, page.page_size, total))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration as ChronoDuration};
    use shift_entity::job::InvokeMeta;

    use super::*;

    fn new_job(name: &str) -> NewJob {
        NewJob {
            app_id: Some("app".into()),
            user_id: Some("user".into()),
            job_type: Some("test".into()),
            job_name: Some(name.into()),
            invoke_meta: InvokeMeta::new("Reports", "build", vec!["i32".into()]),
            parameters: "[1]".into(),
        }
    }

    fn job_created_at(name: &str, created_at: DateTime<Utc>) -> Job {
        Job::from_new(JobId::new(), new_job(name), created_at)
    }

    #[tokio::test]
    async fn test_claim_has_single_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = store.add(new_job("contested")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let process_id = format!("proc-{i}");
                let won = store.claim_job(&process_id, job_id).await.unwrap();
                (process_id, won)
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            let (process_id, won) = handle.await.unwrap();
            if won {
                winners.push(process_id);
            }
        }
        assert_eq!(winners.len(), 1);
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.process_id.as_deref(), Some(winners[0].as_str()));
    }

    #[tokio::test]
    async fn test_run_now_takes_priority() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let a = job_created_at("a", now - ChronoDuration::seconds(10));
        let mut b = job_created_at("b", now);
        b.command = Some(JobCommand::RunNow);
        let b_id = b.job_id;
        store.insert(a).await;
        store.insert(b).await;

        let runnable = store.get_runnable_jobs(1).await.unwrap();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].job_id, b_id);
    }

    #[tokio::test]
    async fn test_runnable_jobs_are_fifo() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let a = job_created_at("a", now - ChronoDuration::seconds(10));
        let a_id = a.job_id;
        store.insert(job_created_at("b", now)).await;
        store.insert(a).await;

        let runnable = store.get_runnable_jobs(1).await.unwrap();
        assert_eq!(runnable[0].job_id, a_id);
    }

    #[tokio::test]
    async fn test_stop_flagged_job_is_not_runnable() {
        let store = MemoryJobStore::new();
        let id = store.add(new_job("flagged")).await.unwrap();
        assert_eq!(store.set_command(&[id], JobCommand::Stop).await.unwrap(), 1);
        assert!(store.get_runnable_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_reset_skip_running_jobs() {
        let store = MemoryJobStore::new();
        let id = store.add(new_job("busy")).await.unwrap();
        store.claim_job("proc-0", id).await.unwrap();
        store.set_running("proc-0", id).await.unwrap();
        let before = store.get_job(id).await.unwrap().unwrap();

        assert_eq!(store.delete(&[id]).await.unwrap(), 0);
        assert_eq!(store.reset(&[id]).await.unwrap(), 0);

        let after = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.process_id, before.process_id);
        assert_eq!(after.started_at, before.started_at);
    }

    #[tokio::test]
    async fn test_reset_and_delete_non_running_jobs() {
        let store = MemoryJobStore::new();
        let failed = store.add(new_job("failed")).await.unwrap();
        store.claim_job("proc-0", failed).await.unwrap();
        store.set_running("proc-0", failed).await.unwrap();
        store.set_error("proc-0", failed, "boom").await.unwrap();
        store
            .upsert_progress(failed, &ProgressInfo::percent(30))
            .await
            .unwrap();

        assert_eq!(store.reset(&[failed]).await.unwrap(), 1);
        let job = store.get_job(failed).await.unwrap().unwrap();
        assert!(job.status.is_none());
        assert!(job.process_id.is_none());
        assert!(job.command.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
        assert!(job.ended_at.is_none());
        assert!(store.get_progress(failed).await.unwrap().is_none());

        assert_eq!(store.delete(&[failed]).await.unwrap(), 1);
        assert!(store.get_job(failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_error_appends() {
        let store = MemoryJobStore::new();
        let id = store.add(new_job("flaky")).await.unwrap();
        store.claim_job("proc-0", id).await.unwrap();
        store.set_error("proc-0", id, "first").await.unwrap();
        store.set_error("proc-0", id, "second").await.unwrap();
        assert_eq!(store.set_error("proc-1", id, "ignored").await.unwrap(), 0);

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Error));
        assert_eq!(job.error.as_deref(), Some("first\nsecond"));
    }

    #[tokio::test]
    async fn test_retention_purge() {
        let store = MemoryJobStore::new();
        let old = Utc::now() - ChronoDuration::hours(48);

        let mut old_completed = job_created_at("old-completed", old);
        old_completed.status = Some(JobStatus::Completed);
        let old_unset = job_created_at("old-unset", old);
        let mut old_error = job_created_at("old-error", old);
        old_error.status = Some(JobStatus::Error);
        let mut fresh_completed = job_created_at("fresh", Utc::now());
        fresh_completed.status = Some(JobStatus::Completed);

        let (oc, ou, oe, fc) = (
            old_completed.job_id,
            old_unset.job_id,
            old_error.job_id,
            fresh_completed.job_id,
        );
        for job in [old_completed, old_unset, old_error, fresh_completed] {
            store.insert(job).await;
        }

        let purged = store
            .delete_older_than(
                Duration::from_secs(24 * 60 * 60),
                &[Some(JobStatus::Completed), None],
            )
            .await
            .unwrap();
        assert_eq!(purged, 2);
        assert!(store.get_job(oc).await.unwrap().is_none());
        assert!(store.get_job(ou).await.unwrap().is_none());
        assert!(store.get_job(oe).await.unwrap().is_some());
        assert!(store.get_job(fc).await.unwrap().is_some());

        let none = store
            .delete_older_than(Duration::from_secs(60), &[])
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_retention_purge_keeps_running_jobs() {
        let store = MemoryJobStore::new();
        let old = Utc::now() - ChronoDuration::hours(48);
        let mut running = job_created_at("old-running", old);
        running.process_id = Some("proc-0".into());
        running.status = Some(JobStatus::Running);
        let id = running.job_id;
        store.insert(running).await;

        let purged = store
            .delete_older_than(Duration::from_secs(60), &[Some(JobStatus::Running)])
            .await
            .unwrap();
        assert_eq!(purged, 0);
        assert!(store.get_job(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fail_running_leaves_finished_jobs() {
        let store = MemoryJobStore::new();
        let id = store.add(new_job("finished")).await.unwrap();
        store.claim_job("proc-0", id).await.unwrap();
        store.set_running("proc-0", id).await.unwrap();
        store.set_completed("proc-0", id).await.unwrap();

        assert_eq!(store.fail_running("proc-0", id, "lost").await.unwrap(), 0);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Completed));
        assert!(job.error.is_none());

        let live = store.add(new_job("live")).await.unwrap();
        store.claim_job("proc-0", live).await.unwrap();
        store.set_running("proc-0", live).await.unwrap();
        assert_eq!(store.fail_running("proc-1", live, "lost").await.unwrap(), 0);
        assert_eq!(store.fail_running("proc-0", live, "lost").await.unwrap(), 1);
        let job = store.get_job(live).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Error));
        assert_eq!(job.error.as_deref(), Some("lost"));
    }

    #[tokio::test]
    async fn test_stop_skips_finished_jobs() {
        let store = MemoryJobStore::new();
        let done = store.add(new_job("done")).await.unwrap();
        store.claim_job("proc-0", done).await.unwrap();
        store.set_running("proc-0", done).await.unwrap();
        store.set_completed("proc-0", done).await.unwrap();
        let queued = store.add(new_job("queued")).await.unwrap();

        assert_eq!(store.set_stopped(&[done, queued]).await.unwrap(), 1);
        let job = store.get_job(done).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Completed));
        let job = store.get_job(queued).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Stopped));
    }

    #[tokio::test]
    async fn test_stopped_job_cannot_start() {
        let store = MemoryJobStore::new();
        let id = store.add(new_job("raced")).await.unwrap();
        assert!(store.claim_job("proc-1", id).await.unwrap());
        assert_eq!(store.set_stopped(&[id]).await.unwrap(), 1);

        assert_eq!(store.set_running("proc-1", id).await.unwrap(), 0);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, Some(JobStatus::Stopped));
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn test_command_guards_and_owner_lookup() {
        let store = MemoryJobStore::new();
        let unset = store.add(new_job("unset")).await.unwrap();
        let running = store.add(new_job("running")).await.unwrap();
        store.claim_job("proc-0", running).await.unwrap();
        store.set_running("proc-0", running).await.unwrap();

        assert_eq!(store.set_command(&[unset], JobCommand::Pause).await.unwrap(), 0);
        assert_eq!(
            store
                .set_command(&[unset, running], JobCommand::Stop)
                .await
                .unwrap(),
            2
        );

        let ids = store
            .get_job_ids_by_owner_and_command("proc-0", JobCommand::Stop)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let other = store
            .get_job_ids_by_owner_and_command("proc-1", JobCommand::Stop)
            .await
            .unwrap();
        assert_eq!(other, vec![unset]);
    }

    #[tokio::test]
    async fn test_status_counts_and_listing() {
        let store = MemoryJobStore::new();
        let a = store.add(new_job("a")).await.unwrap();
        store.add(new_job("b")).await.unwrap();
        store.claim_job("proc-0", a).await.unwrap();
        store.set_running("proc-0", a).await.unwrap();

        let counts = store.status_counts(Some("app"), None).await.unwrap();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.not_started, 1);
        assert_eq!(counts.total, 2);
        assert_eq!(store.count_running("proc-0").await.unwrap(), 1);

        let page = store.list_jobs(&PageRequest::new(1, 1)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_items, 2);
        assert!(page.has_next());
    }
}
