//! Periodic cleanup sweep.
//!
//! Brings the job store and a worker's context table back into agreement:
//! acts on stop commands, purges expired jobs, flags running jobs whose
//! execution is gone, and drops contexts whose job is gone or finished.
//! Each step runs even if an earlier one failed.

use std::collections::HashMap;

use shift_entity::job::JobStatus;

use crate::worker::Worker;

/// Error recorded on a running job this worker has no execution for.
pub const ZOMBIE_ERROR: &str = "No actual running job process found. Try reset and run again.";

/// What one cleanup sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stop commands acted on.
    pub stop_requests: usize,
    /// Jobs deleted by the retention purge.
    pub purged: u64,
    /// Running jobs marked as errors because no execution exists.
    pub zombies: usize,
    /// Contexts dropped because their job no longer exists.
    pub orphans: usize,
    /// Contexts dropped because their job already finished.
    pub released: usize,
}

impl CleanupReport {
    /// Whether the sweep changed anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Worker {
    /// Run one cleanup sweep.
    pub async fn clean_up(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.stop_jobs().await {
            Ok(count) => report.stop_requests = count,
            Err(e) => {
                tracing::error!(worker_id = %self.process_id, error = %e, "Stop sweep failed")
            }
        }

        if let Some(period) = self.settings.auto_delete_period {
            match self
                .store
                .delete_older_than(period, &self.settings.auto_delete_statuses)
                .await
            {
                Ok(count) => report.purged = count,
                Err(e) => {
                    tracing::error!(worker_id = %self.process_id, error = %e, "Retention purge failed")
                }
            }
        }

        report.zombies = self.flag_zombies().await;

        let (orphans, released) = self.release_stale_contexts().await;
        report.orphans = orphans;
        report.released = released;

        if !report.is_empty() {
            tracing::info!(
                worker_id = %self.process_id,
                stop_requests = report.stop_requests,
                purged = report.purged,
                zombies = report.zombies,
                orphans = report.orphans,
                released = report.released,
                "Cleanup sweep finished"
            );
        }
        report
    }

    /// Mark owned running jobs with no live execution as errors.
    async fn flag_zombies(&self) -> usize {
        let running = match self
            .store
            .get_jobs_by_owner_and_status(&self.process_id, JobStatus::Running)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(worker_id = %self.process_id, error = %e, "Zombie scan failed");
                return 0;
            }
        };

        let mut flagged = 0;
        for job in running {
            if self.contexts.contains(job.job_id) {
                continue;
            }
            match self
                .store
                .fail_running(&self.process_id, job.job_id, ZOMBIE_ERROR)
                .await
            {
                // Finished between the scan and the write.
                Ok(0) => continue,
                Ok(_) => {
                    tracing::warn!(
                        worker_id = %self.process_id,
                        job_id = %job.job_id,
                        "Running job had no execution, marked as error"
                    );
                    flagged += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "Failed to flag zombie job");
                    continue;
                }
            }
            if let Err(e) = self.cache.set_error(job.job_id, ZOMBIE_ERROR).await {
                tracing::warn!(job_id = %job.job_id, error = %e, "Failed to cache zombie error");
            }
        }
        flagged
    }

    /// Drop contexts whose job was deleted or has reached a terminal status.
    async fn release_stale_contexts(&self) -> (usize, usize) {
        let ids = self.contexts.job_ids();
        if ids.is_empty() {
            return (0, 0);
        }

        let jobs = match self.store.get_jobs(&ids).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(worker_id = %self.process_id, error = %e, "Context sweep failed");
                return (0, 0);
            }
        };
        let statuses: HashMap<_, _> = jobs.iter().map(|job| (job.job_id, job.status)).collect();

        let mut orphans = 0;
        let mut released = 0;
        for job_id in ids {
            match statuses.get(&job_id) {
                None => {
                    if self.contexts.release(job_id) {
                        tracing::info!(job_id = %job_id, "Released context of deleted job");
                        orphans += 1;
                    }
                }
                Some(Some(status)) if status.is_terminal() => {
                    if self.contexts.release(job_id) {
                        tracing::debug!(job_id = %job_id, status = %status, "Released context of finished job");
                        released += 1;
                    }
                }
                Some(_) => {}
            }
        }
        (orphans, released)
    }
}
