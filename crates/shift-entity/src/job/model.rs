//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shift_core::types::JobId;
use sqlx::FromRow;
use sqlx::types::Json;

use super::invoke::InvokeMeta;
use super::status::{JobCommand, JobStatus};

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: JobId,
    /// Application that enqueued the job.
    pub app_id: Option<String>,
    /// User that enqueued the job.
    pub user_id: Option<String>,
    /// Free-form job type, used for grouping.
    pub job_type: Option<String>,
    /// Human-readable name.
    pub job_name: Option<String>,
    /// Handler descriptor.
    pub invoke_meta: Json<InvokeMeta>,
    /// Serialized, cipher-protected argument list.
    pub parameters: String,
    /// Identity of the claiming worker.
    pub process_id: Option<String>,
    /// Pending command.
    pub command: Option<JobCommand>,
    /// Current status; `None` until the job starts.
    pub status: Option<JobStatus>,
    /// Accumulated error text.
    pub error: Option<String>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build an unstarted, unowned job from a new-job request.
    pub fn from_new(job_id: JobId, new: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            app_id: new.app_id,
            user_id: new.user_id,
            job_type: new.job_type,
            job_name: new.job_name,
            invoke_meta: Json(new.invoke_meta),
            parameters: new.parameters,
            process_id: None,
            command: None,
            status: None,
            error: None,
            started_at: None,
            ended_at: None,
            created_at,
        }
    }

    /// Whether the store currently records the job as running.
    pub fn is_running(&self) -> bool {
        self.status == Some(JobStatus::Running)
    }

    /// Whether the job has neither started nor been claimed.
    pub fn is_unclaimed(&self) -> bool {
        self.status.is_none() && self.process_id.is_none()
    }

    /// Clear every run-state field, returning the job to the queue.
    pub fn reset_run_state(&mut self) {
        self.process_id = None;
        self.command = None;
        self.status = None;
        self.error = None;
        self.started_at = None;
        self.ended_at = None;
    }
}

/// Data required to enqueue (or re-target) a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Application id.
    pub app_id: Option<String>,
    /// User id.
    pub user_id: Option<String>,
    /// Job type.
    pub job_type: Option<String>,
    /// Job name.
    pub job_name: Option<String>,
    /// Handler descriptor.
    pub invoke_meta: InvokeMeta,
    /// Serialized, cipher-protected arguments.
    pub parameters: String,
}
