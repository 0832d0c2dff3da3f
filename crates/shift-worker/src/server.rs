//! Job server: runs a process's workers on poll and cleanup timers and
//! shuts them down gracefully.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use shift_cache::ProgressCache;
use shift_core::config::ServerConfig;
use shift_core::error::AppError;
use shift_core::result::AppResult;
use shift_core::traits::ParameterCipher;
use shift_core::types::JobId;
use shift_database::JobStore;

use crate::registry::HandlerRegistry;
use crate::worker::{Worker, WorkerSettings};

/// Owns the workers of one process.
#[derive(Debug)]
pub struct JobServer {
    workers: Arc<Vec<Worker>>,
    poll_interval: Duration,
    cleanup_interval: Duration,
    force_stop_on_shutdown: bool,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobServer {
    /// Build `config.workers` workers named `"{process_id}-{index}"`.
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn ProgressCache>,
        registry: HandlerRegistry,
        cipher: Arc<dyn ParameterCipher>,
    ) -> AppResult<Self> {
        if config.workers == 0 {
            return Err(AppError::configuration("server.workers must be at least 1"));
        }
        if config.process_id.trim().is_empty() {
            return Err(AppError::configuration("server.process_id must not be empty"));
        }
        if config.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "server.poll_interval_seconds must be at least 1",
            ));
        }
        if config.cleanup_interval_seconds == 0 {
            return Err(AppError::configuration(
                "server.cleanup_interval_seconds must be at least 1",
            ));
        }

        let settings = WorkerSettings::from_config(config)?;
        let registry = Arc::new(registry);
        let workers = (0..config.workers)
            .map(|index| {
                Worker::new(
                    format!("{}-{index}", config.process_id),
                    Arc::clone(&store),
                    Arc::clone(&cache),
                    Arc::clone(&registry),
                    Arc::clone(&cipher),
                    settings.clone(),
                )
            })
            .collect();

        Ok(Self {
            workers: Arc::new(workers),
            poll_interval: config.poll_interval(),
            cleanup_interval: config.cleanup_interval(),
            force_stop_on_shutdown: config.force_stop_on_shutdown,
            shutdown_grace: config.shutdown_grace(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The workers owned by this server.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Start the poll and cleanup loops.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::warn!("Job server already started");
            return;
        }

        let workers = Arc::clone(&self.workers);
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => poll_workers(&workers).await,
                }
            }
            tracing::debug!("Poll loop stopped");
        }));

        let workers = Arc::clone(&self.workers);
        let shutdown = self.shutdown.clone();
        let cleanup_interval = self.cleanup_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => clean_up_workers(&workers).await,
                }
            }
            tracing::debug!("Cleanup loop stopped");
        }));

        tracing::info!(
            workers = self.workers.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            cleanup_interval_secs = self.cleanup_interval.as_secs(),
            "Job server started"
        );
    }

    /// Run one poll on every worker without waiting for the timer.
    pub async fn poll_now(&self) {
        poll_workers(&self.workers).await;
    }

    /// Run one cleanup sweep on every worker without waiting for the timer.
    pub async fn clean_up_now(&self) {
        clean_up_workers(&self.workers).await;
    }

    /// Claim and start the given jobs on the least busy worker, bypassing
    /// its capacity limit.
    pub async fn run_jobs_now(&self, job_ids: &[JobId]) -> AppResult<Vec<JobId>> {
        let worker = self
            .workers
            .iter()
            .min_by_key(|worker| worker.contexts().len())
            .ok_or_else(|| AppError::internal("Job server has no workers"))?;
        worker.run_selected_jobs(job_ids).await
    }

    /// Stop the timers, optionally stop running jobs, and wait up to the
    /// grace period for executions to unwind.
    pub async fn shutdown(&self) {
        tracing::info!("Job server shutting down");
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        join_all(tasks).await;

        if self.force_stop_on_shutdown {
            for worker in self.workers.iter() {
                match worker.stop_all_running_jobs().await {
                    Ok(flagged) if flagged > 0 => {
                        tracing::info!(worker_id = %worker.process_id(), flagged, "Flagged running jobs to stop");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(worker_id = %worker.process_id(), error = %e, "Failed to flag running jobs");
                    }
                }
                if let Err(e) = worker.stop_jobs().await {
                    tracing::error!(worker_id = %worker.process_id(), error = %e, "Failed to stop jobs");
                }
            }
        }

        let drained = time::timeout(
            self.shutdown_grace,
            join_all(self.workers.iter().map(|worker| worker.wait_idle())),
        )
        .await;
        match drained {
            Ok(_) => tracing::info!("Job server shut down complete"),
            Err(_) => {
                let remaining: usize = self.workers.iter().map(|w| w.contexts().len()).sum();
                tracing::warn!(
                    remaining,
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Shutdown grace period elapsed with jobs still running"
                );
            }
        }
    }
}

async fn poll_workers(workers: &[Worker]) {
    for worker in workers {
        if let Err(e) = worker.run_jobs().await {
            tracing::error!(worker_id = %worker.process_id(), error = %e, "Failed to run jobs");
        }
        if let Err(e) = worker.pause_jobs().await {
            tracing::error!(worker_id = %worker.process_id(), error = %e, "Failed to pause jobs");
        }
        if let Err(e) = worker.continue_jobs().await {
            tracing::error!(worker_id = %worker.process_id(), error = %e, "Failed to continue jobs");
        }
    }
}

async fn clean_up_workers(workers: &[Worker]) {
    for worker in workers {
        worker.clean_up().await;
    }
}
