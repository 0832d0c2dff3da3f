//! Progress records, the cached progress mirror, and job views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shift_core::types::JobId;
use sqlx::FromRow;

use super::model::Job;
use super::status::JobStatus;

/// Durable progress row, one per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobProgress {
    /// Job this row belongs to.
    pub job_id: JobId,
    /// Completion percentage, 0-100.
    pub percent: Option<i32>,
    /// Short human-readable note.
    pub note: Option<String>,
    /// Free-form handler data.
    pub data: Option<String>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// A single progress update pushed by a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Completion percentage, 0-100.
    pub percent: Option<i32>,
    /// Short human-readable note.
    pub note: Option<String>,
    /// Free-form handler data.
    pub data: Option<String>,
}

impl ProgressInfo {
    /// Progress with only a percentage.
    pub fn percent(percent: i32) -> Self {
        Self {
            percent: Some(percent.clamp(0, 100)),
            ..Default::default()
        }
    }

    /// Progress with only a note.
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }

    /// Attach a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Attach handler data.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Whether this update reports completion.
    pub fn is_complete(&self) -> bool {
        self.percent.is_some_and(|p| p >= 100)
    }
}

/// Best-effort mirror of a job's latest status and progress, kept in the
/// progress cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedProgress {
    /// Job id.
    pub job_id: JobId,
    /// Last known status.
    pub status: Option<JobStatus>,
    /// Completion percentage.
    pub percent: Option<i32>,
    /// Note.
    pub note: Option<String>,
    /// Handler data.
    pub data: Option<String>,
    /// Accumulated error text.
    pub error: Option<String>,
    /// Last update time.
    pub updated: DateTime<Utc>,
}

impl CachedProgress {
    /// Fresh entry for a job that just started reporting.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: Some(JobStatus::Running),
            percent: None,
            note: None,
            data: None,
            error: None,
            updated: Utc::now(),
        }
    }

    /// Apply a progress update.
    pub fn apply(&mut self, progress: &ProgressInfo) {
        self.percent = progress.percent;
        self.note = progress.note.clone();
        self.data = progress.data.clone();
        self.updated = Utc::now();
    }

    /// Append an error message, separating entries with a newline.
    pub fn append_error(&mut self, message: &str) {
        self.error = Some(append_error_text(self.error.take(), message));
        self.updated = Utc::now();
    }
}

impl From<&JobView> for CachedProgress {
    fn from(view: &JobView) -> Self {
        Self {
            job_id: view.job.job_id,
            status: view.job.status,
            percent: view.progress.as_ref().and_then(|p| p.percent),
            note: view.progress.as_ref().and_then(|p| p.note.clone()),
            data: view.progress.as_ref().and_then(|p| p.data.clone()),
            error: view.job.error.clone(),
            updated: view
                .progress
                .as_ref()
                .map(|p| p.updated_at)
                .unwrap_or(view.job.created_at),
        }
    }
}

/// A job together with its durable progress row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    /// The job record.
    #[serde(flatten)]
    pub job: Job,
    /// Latest persisted progress, if any was written.
    pub progress: Option<JobProgress>,
}

/// Job counts per status for one app/user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCount {
    /// Jobs that have not started.
    pub not_started: i64,
    /// Running jobs.
    pub running: i64,
    /// Paused jobs.
    pub paused: i64,
    /// Stopped jobs.
    pub stopped: i64,
    /// Completed jobs.
    pub completed: i64,
    /// Failed jobs.
    pub error: i64,
    /// All jobs.
    pub total: i64,
}

impl JobStatusCount {
    /// Add `count` jobs with the given status.
    pub fn record(&mut self, status: Option<JobStatus>, count: i64) {
        match status {
            None => self.not_started += count,
            Some(JobStatus::Running) => self.running += count,
            Some(JobStatus::Paused) => self.paused += count,
            Some(JobStatus::Stopped) => self.stopped += count,
            Some(JobStatus::Completed) => self.completed += count,
            Some(JobStatus::Error) => self.error += count,
        }
        self.total += count;
    }
}

/// Append `message` to existing error text. History is never overwritten.
pub fn append_error_text(existing: Option<String>, message: &str) -> String {
    match existing {
        Some(prev) if !prev.is_empty() => format!("{prev}\n{message}"),
        _ => message.to_string(),
    }
}
