//! Cache key layout.

use shift_core::types::JobId;

/// `job-progress:{job_id}`
pub fn job_progress(job_id: JobId) -> String {
    format!("job-progress:{job_id}")
}
