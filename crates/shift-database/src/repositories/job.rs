//! PostgreSQL job store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use shift_core::error::{AppError, ErrorKind};
use shift_core::result::AppResult;
use shift_core::types::JobId;
use shift_core::types::pagination::{PageRequest, PageResponse};
use shift_entity::job::{
    Job, JobCommand, JobProgress, JobStatus, JobStatusCount, JobView, NewJob, ProgressInfo,
};

use crate::store::JobStore;

/// Repository for job records and their progress rows.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn delete_progress(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ids: &[Uuid],
    ) -> AppResult<()> {
        sqlx::query("DELETE FROM job_progress WHERE job_id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to clear progress", e))?;
        Ok(())
    }

    async fn progress_for(&self, ids: &[Uuid]) -> AppResult<HashMap<JobId, JobProgress>> {
        let rows = sqlx::query_as::<_, JobProgress>(
            "SELECT * FROM job_progress WHERE job_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to load progress", e))?;
        Ok(rows.into_iter().map(|p| (p.job_id, p)).collect())
    }
}

/// Convert typed ids into the array parameter the queries bind.
fn uuids(job_ids: &[JobId]) -> Vec<Uuid> {
    job_ids.iter().map(|id| id.into_uuid()).collect()
}

#[async_trait]
impl JobStore for JobRepository {
    async fn add(&self, job: NewJob) -> AppResult<JobId> {
        let job_id = JobId::new();
        sqlx::query(
            "INSERT INTO jobs (job_id, app_id, user_id, job_type, job_name, invoke_meta, parameters, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job_id)
        .bind(&job.app_id)
        .bind(&job.user_id)
        .bind(&job.job_type)
        .bind(&job.job_name)
        .bind(Json(&job.invoke_meta))
        .bind(&job.parameters)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to add job", e))?;
        Ok(job_id)
    }

    async fn update(&self, job_id: JobId, job: NewJob) -> AppResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e))?;

        let count = sqlx::query(
            "UPDATE jobs SET app_id = $2, user_id = $3, job_type = $4, job_name = $5, \
             invoke_meta = $6, parameters = $7, process_id = NULL, command = NULL, \
             status = NULL, error = NULL, started_at = NULL, ended_at = NULL \
             WHERE job_id = $1 AND (status IS NULL OR status <> 'running')",
        )
        .bind(job_id)
        .bind(&job.app_id)
        .bind(&job.user_id)
        .bind(&job.job_type)
        .bind(&job.job_name)
        .bind(Json(&job.invoke_meta))
        .bind(&job.parameters)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update job", e))?
        .rows_affected();

        if count > 0 {
            Self::delete_progress(&mut tx, &[job_id.into_uuid()]).await?;
        }
        tx.commit()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to commit update", e))?;
        Ok(count)
    }

    async fn get_runnable_jobs(&self, limit: usize) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs \
             WHERE status IS NULL AND process_id IS NULL \
             AND (command IS NULL OR command = 'run_now') \
             ORDER BY CASE WHEN command = 'run_now' THEN 0 ELSE 1 END, created_at, job_id \
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fetch runnable jobs", e))
    }

    async fn claim_job(&self, process_id: &str, job_id: JobId) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET process_id = $1 \
             WHERE job_id = $2 AND status IS NULL AND process_id IS NULL \
             AND (command IS NULL OR command = 'run_now')",
        )
        .bind(process_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn get_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_id = ANY($1) ORDER BY created_at, job_id")
            .bind(uuids(job_ids))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find jobs", e))
    }

    async fn get_non_running_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<Job>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE job_id = ANY($1) AND status IS NULL \
             ORDER BY created_at, job_id",
        )
        .bind(uuids(job_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find non-running jobs", e))
    }

    async fn get_jobs_by_owner_and_status(
        &self,
        process_id: &str,
        status: JobStatus,
    ) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE process_id = $1 AND status = $2 ORDER BY created_at, job_id",
        )
        .bind(process_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find owned jobs", e))
    }

    async fn get_job_ids_by_owner_and_command(
        &self,
        process_id: &str,
        command: JobCommand,
    ) -> AppResult<Vec<JobId>> {
        sqlx::query_scalar::<_, JobId>(
            "SELECT job_id FROM jobs \
             WHERE (process_id = $1 OR process_id IS NULL) AND command = $2 \
             ORDER BY created_at, job_id",
        )
        .bind(process_id)
        .bind(command)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find commanded jobs", e))
    }

    async fn set_running(&self, process_id: &str, job_id: JobId) -> AppResult<u64> {
        sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = NOW() \
             WHERE job_id = $2 AND process_id = $1 AND status IS NULL",
        )
        .bind(process_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set job running", e))
    }

    async fn set_completed(&self, process_id: &str, job_id: JobId) -> AppResult<u64> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', command = NULL, ended_at = NOW() \
             WHERE job_id = $2 AND process_id = $1",
        )
        .bind(process_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set job completed", e))
    }

    async fn set_error(&self, process_id: &str, job_id: JobId, message: &str) -> AppResult<u64> {
        sqlx::query(
            "UPDATE jobs SET status = 'error', \
             error = CASE WHEN error IS NULL OR error = '' THEN $3 ELSE error || E'\\n' || $3 END \
             WHERE job_id = $2 AND process_id = $1",
        )
        .bind(process_id)
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set job error", e))
    }

    async fn fail_running(
        &self,
        process_id: &str,
        job_id: JobId,
        message: &str,
    ) -> AppResult<u64> {
        sqlx::query(
            "UPDATE jobs SET status = 'error', \
             error = CASE WHEN error IS NULL OR error = '' THEN $3 ELSE error || E'\\n' || $3 END \
             WHERE job_id = $2 AND process_id = $1 AND status = 'running'",
        )
        .bind(process_id)
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to fail running job", e))
    }

    async fn set_stopped(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE jobs SET status = 'stopped', command = NULL, ended_at = NOW() \
             WHERE job_id = ANY($1) AND {}",
            JobCommand::Stop.sql_guard()
        );
        sqlx::query(&sql)
            .bind(uuids(job_ids))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set jobs stopped", e))
    }

    async fn set_paused(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        sqlx::query("UPDATE jobs SET status = 'paused', command = NULL WHERE job_id = ANY($1)")
            .bind(uuids(job_ids))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set jobs paused", e))
    }

    async fn set_resumed(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        sqlx::query(
            "UPDATE jobs SET status = 'running', command = NULL \
             WHERE job_id = ANY($1) AND status = 'paused'",
        )
        .bind(uuids(job_ids))
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to resume jobs", e))
    }

    async fn clear_command(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        sqlx::query("UPDATE jobs SET command = NULL WHERE job_id = ANY($1)")
            .bind(uuids(job_ids))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to clear command", e))
    }

    async fn set_command(&self, job_ids: &[JobId], command: JobCommand) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE jobs SET command = $2 WHERE job_id = ANY($1) AND {}",
            command.sql_guard()
        );
        sqlx::query(&sql)
            .bind(uuids(job_ids))
            .bind(command)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set command", e))
    }

    async fn count_running(&self, process_id: &str) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE process_id = $1 AND status = 'running'",
        )
        .bind(process_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count running jobs", e))?;
        Ok(count as u64)
    }

    async fn delete_older_than(
        &self,
        period: Duration,
        statuses: &[Option<JobStatus>],
    ) -> AppResult<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let include_unset = statuses.iter().any(Option::is_none);
        let named: Vec<String> = statuses
            .iter()
            .flatten()
            .map(|s| s.as_str().to_string())
            .collect();
        let period = chrono::Duration::from_std(period)
            .map_err(|e| AppError::with_source(ErrorKind::Validation, "Retention period out of range", e))?;
        let cutoff = Utc::now() - period;

        sqlx::query(
            "DELETE FROM jobs WHERE created_at < $1 \
             AND status IS DISTINCT FROM 'running' \
             AND (status::text = ANY($2) OR ($3 AND status IS NULL))",
        )
        .bind(cutoff)
        .bind(named)
        .bind(include_unset)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to purge old jobs", e))
    }

    async fn upsert_progress(&self, job_id: JobId, progress: &ProgressInfo) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO job_progress (job_id, percent, note, data, updated_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET percent = EXCLUDED.percent, \
             note = EXCLUDED.note, data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
        )
        .bind(job_id)
        .bind(progress.percent)
        .bind(&progress.note)
        .bind(&progress.data)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to write progress", e))?;
        Ok(())
    }

    async fn get_progress(&self, job_id: JobId) -> AppResult<Option<JobProgress>> {
        sqlx::query_as::<_, JobProgress>("SELECT * FROM job_progress WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to read progress", e))
    }

    async fn get_job_view(&self, job_id: JobId) -> AppResult<Option<JobView>> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };
        let progress = self.get_progress(job_id).await?;
        Ok(Some(JobView { job, progress }))
    }

    async fn reset(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e))?;

        let reset: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE jobs SET process_id = NULL, command = NULL, status = NULL, error = NULL, \
             started_at = NULL, ended_at = NULL \
             WHERE job_id = ANY($1) AND (status IS NULL OR status <> 'running') \
             RETURNING job_id",
        )
        .bind(uuids(job_ids))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to reset jobs", e))?;

        Self::delete_progress(&mut tx, &reset).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to commit reset", e))?;
        Ok(reset.len() as u64)
    }

    async fn delete(&self, job_ids: &[JobId]) -> AppResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        sqlx::query(
            "DELETE FROM jobs WHERE job_id = ANY($1) AND (status IS NULL OR status <> 'running')",
        )
        .bind(uuids(job_ids))
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to delete jobs", e))
    }

    async fn status_counts(
        &self,
        app_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<JobStatusCount> {
        let rows: Vec<(Option<JobStatus>, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs \
             WHERE ($1::text IS NULL OR app_id = $1) AND ($2::text IS NULL OR user_id = $2) \
             GROUP BY status",
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))?;

        let mut counts = JobStatusCount::default();
        for (status, count) in rows {
            counts.record(status, count);
        }
        Ok(counts)
    }

    async fn list_jobs(&self, page: &PageRequest) -> AppResult<PageResponse<JobView>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))?;

        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs ORDER BY created_at DESC, job_id DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list jobs", e))?;

        let ids: Vec<Uuid> = jobs.iter().map(|j| j.job_id.into_uuid()).collect();
        let mut progress = self.progress_for(&ids).await?;
        let views = jobs
            .into_iter()
            .map(|job| {
                let progress = progress.remove(&job.job_id);
                JobView { job, progress }
            })
            .collect();

        Ok(PageResponse::new(views, page.page, page.page_size, total as u64))
    }
}
