//! Job server and worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings consumed by the job server, its workers, and the cleanup sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Identity of this server process. Each worker claims jobs as
    /// `"{process_id}-{worker_index}"`.
    #[serde(default = "default_process_id")]
    pub process_id: String,
    /// Number of workers (independent claimers) in this process.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum jobs a single worker runs at the same time.
    #[serde(default = "default_max_runnable_jobs")]
    pub max_runnable_jobs: usize,
    /// Key handed to the parameter cipher. The plaintext cipher ignores it.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Interval in seconds between runnable-job polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Interval in seconds between cleanup sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Minimum seconds between durable progress writes for one job.
    #[serde(default = "default_progress_store_interval")]
    pub progress_store_interval_seconds: u64,
    /// Seconds a terminal job's cached progress stays visible.
    #[serde(default = "default_progress_cache_eviction")]
    pub progress_cache_eviction_seconds: u64,
    /// Jobs created longer ago than this are purged by the cleanup sweep.
    #[serde(default)]
    pub auto_delete_period_hours: Option<u64>,
    /// Statuses eligible for the retention purge. `"none"` selects jobs
    /// that never started.
    #[serde(default = "default_auto_delete_statuses")]
    pub auto_delete_statuses: Vec<String>,
    /// Flag running jobs with a stop command when the server shuts down.
    #[serde(default)]
    pub force_stop_on_shutdown: bool,
    /// Seconds to wait for in-flight jobs during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl ServerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Cleanup interval as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Durable progress write interval as a [`Duration`].
    pub fn progress_store_interval(&self) -> Duration {
        Duration::from_secs(self.progress_store_interval_seconds)
    }

    /// Cached progress eviction delay as a [`Duration`].
    pub fn progress_cache_eviction(&self) -> Duration {
        Duration::from_secs(self.progress_cache_eviction_seconds)
    }

    /// Retention period as a [`Duration`], if configured.
    pub fn auto_delete_period(&self) -> Option<Duration> {
        self.auto_delete_period_hours
            .map(|hours| Duration::from_secs(hours.saturating_mul(60 * 60)))
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            process_id: default_process_id(),
            workers: default_workers(),
            max_runnable_jobs: default_max_runnable_jobs(),
            encryption_key: None,
            poll_interval_seconds: default_poll_interval(),
            cleanup_interval_seconds: default_cleanup_interval(),
            progress_store_interval_seconds: default_progress_store_interval(),
            progress_cache_eviction_seconds: default_progress_cache_eviction(),
            auto_delete_period_hours: None,
            auto_delete_statuses: default_auto_delete_statuses(),
            force_stop_on_shutdown: false,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_process_id() -> String {
    "shift".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_runnable_jobs() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_cleanup_interval() -> u64 {
    10
}

fn default_progress_store_interval() -> u64 {
    10
}

fn default_progress_cache_eviction() -> u64 {
    60
}

fn default_auto_delete_statuses() -> Vec<String> {
    vec!["completed".to_string()]
}

fn default_shutdown_grace() -> u64 {
    10
}
