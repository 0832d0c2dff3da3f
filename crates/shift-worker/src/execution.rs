//! Lifecycle of a single job execution, from `Running` to its terminal
//! status.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use shift_core::types::JobId;
use shift_entity::job::{Job, JobStatus, ProgressInfo};

use crate::context::ExecutionHandle;
use crate::progress::spawn_reporter;
use crate::registry::{JobArguments, JobContext, JobError, JobHandler};
use crate::worker::Worker;

/// Longest wait for progress writers once the handler has returned.
const PROGRESS_FLUSH_LIMIT: Duration = Duration::from_secs(30);

/// How a handler invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Returned normally.
    Completed,
    /// Unwound after cancellation was raised.
    Cancelled,
    /// Failed or panicked.
    Faulted(String),
}

impl ExecutionOutcome {
    /// Classify a handler result. A failure observed after cancellation
    /// was raised counts as a cancellation.
    pub fn classify(result: Result<(), JobError>, cancelled: bool) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(JobError::Cancelled) => Self::Cancelled,
            Err(JobError::Failed(_)) if cancelled => Self::Cancelled,
            Err(JobError::Failed(message)) => Self::Faulted(message),
        }
    }

    /// Status recorded for this outcome.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Cancelled => JobStatus::Stopped,
            Self::Faulted(_) => JobStatus::Error,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Job handler panicked: {detail}")
}

impl Worker {
    /// Run a dispatched job to completion and record its outcome.
    pub(crate) async fn execute(
        &self,
        job: Job,
        handler: Arc<dyn JobHandler>,
        args: JobArguments,
        handle: ExecutionHandle,
    ) {
        let job_id = job.job_id;

        match self.store.set_running(&self.process_id, job_id).await {
            Ok(0) => {
                tracing::warn!(
                    worker_id = %self.process_id,
                    job_id = %job_id,
                    "Job no longer owned by this worker, abandoning execution"
                );
                self.contexts.finish(&handle);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job running");
                let message = format!("Failed to start job: {e}");
                if let Err(e) = self.store.set_error(&self.process_id, job_id, &message).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record start failure");
                }
                if let Err(e) = self.cache.set_error(job_id, &message).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to cache start failure");
                }
                self.contexts.finish(&handle);
                self.schedule_cache_eviction(job_id);
                return;
            }
        }

        if let Err(e) = self.cache.set_status(job_id, JobStatus::Running).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to cache running status");
        }
        let initial = ProgressInfo::default();
        if let Err(e) = self.store.upsert_progress(job_id, &initial).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to create progress row");
        }
        if let Err(e) = self.cache.set_progress(job_id, &initial).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to cache initial progress");
        }

        tracing::info!(
            worker_id = %self.process_id,
            job_id = %job_id,
            handler = %job.invoke_meta.key(),
            "Job started"
        );

        let (sink, writers) = spawn_reporter(
            job_id,
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.settings.progress_store_interval,
        );
        let ctx = JobContext::new(job_id, handle.cancel.clone(), handle.pause.clone(), sink);

        let outcome = match AssertUnwindSafe(handler.execute(ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => ExecutionOutcome::classify(result, handle.cancel.is_cancelled()),
            Err(payload) => ExecutionOutcome::Faulted(panic_message(payload)),
        };

        if !writers.flush(PROGRESS_FLUSH_LIMIT).await {
            tracing::warn!(
                job_id = %job_id,
                "Job context outlived its handler, dropping pending progress"
            );
        }

        self.record_outcome(job_id, &outcome).await;
        self.contexts.finish(&handle);
        self.schedule_cache_eviction(job_id);
    }

    async fn record_outcome(&self, job_id: JobId, outcome: &ExecutionOutcome) {
        let stored = match outcome {
            ExecutionOutcome::Completed => {
                tracing::info!(worker_id = %self.process_id, job_id = %job_id, "Job completed");
                self.store.set_completed(&self.process_id, job_id).await
            }
            ExecutionOutcome::Cancelled => {
                tracing::info!(worker_id = %self.process_id, job_id = %job_id, "Job stopped");
                self.store.set_stopped(&[job_id]).await
            }
            ExecutionOutcome::Faulted(message) => {
                tracing::error!(
                    worker_id = %self.process_id,
                    job_id = %job_id,
                    error = %message,
                    "Job failed"
                );
                self.store.set_error(&self.process_id, job_id, message).await
            }
        };
        if let Err(e) = stored {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }

        let cached = match outcome {
            ExecutionOutcome::Faulted(message) => self.cache.set_error(job_id, message).await,
            other => self.cache.set_status(job_id, other.status()).await,
        };
        if let Err(e) = cached {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to cache job outcome");
        }
    }

    fn schedule_cache_eviction(&self, job_id: JobId) {
        let cache = Arc::clone(&self.cache);
        let delay = self.settings.progress_cache_eviction;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = cache.delete(&[job_id]).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to evict cached progress");
            }
        });
    }
}
