//! Execution context table.
//!
//! One table per worker. An entry exists from the moment a claimed job is
//! dispatched until its execution unwinds, and holds the signals the
//! worker uses to stop, pause, and resume it. Entries are never borrowed
//! across an await point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;

use shift_core::types::JobId;

use crate::signals::{CancellationToken, PauseSource, PauseToken};

/// Signals for one live execution.
#[derive(Debug)]
pub struct ExecutionContext {
    generation: u64,
    cancel: CancellationToken,
    pause: Option<PauseSource>,
    finished: CancellationToken,
}

impl ExecutionContext {
    /// Whether the handler opted into pause support.
    pub fn pausable(&self) -> bool {
        self.pause.is_some()
    }

    /// Whether the execution has unwound.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }
}

/// Handle given to the spawned execution for the entry it owns.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub(crate) job_id: JobId,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) pause: PauseToken,
    pub(crate) finished: CancellationToken,
}

/// Result of asking an execution to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelRequest {
    /// No execution for this job in this worker.
    NotRunning,
    /// Cancellation had already been raised.
    AlreadyCancelled,
    /// Cancellation raised now.
    Cancelled,
}

/// Per-worker map from job id to its execution signals.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContexts {
    entries: Arc<DashMap<JobId, ExecutionContext>>,
    next_generation: Arc<AtomicU64>,
}

impl ExecutionContexts {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context for `job_id`. Returns `None` when a live
    /// execution for the same job already exists.
    pub fn register(&self, job_id: JobId, pausable: bool) -> Option<ExecutionHandle> {
        let entry = self.entries.entry(job_id);
        if let Entry::Occupied(existing) = &entry {
            if !existing.get().is_finished() {
                return None;
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let pause = pausable.then(PauseSource::new);
        let pause_token = pause
            .as_ref()
            .map(PauseSource::token)
            .unwrap_or_else(PauseToken::never);

        entry.insert(ExecutionContext {
            generation,
            cancel: cancel.clone(),
            pause,
            finished: finished.clone(),
        });

        Some(ExecutionHandle {
            job_id,
            generation,
            cancel,
            pause: pause_token,
            finished,
        })
    }

    /// Whether a context exists for `job_id`.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Raise cancellation for `job_id`.
    pub fn cancel(&self, job_id: JobId) -> CancelRequest {
        match self.entries.get(&job_id) {
            None => CancelRequest::NotRunning,
            Some(ctx) if ctx.cancel.is_cancelled() => CancelRequest::AlreadyCancelled,
            Some(ctx) => {
                ctx.cancel.cancel();
                CancelRequest::Cancelled
            }
        }
    }

    /// Close the pause gate. `false` if the job has no pausable context or
    /// is already paused.
    pub fn pause(&self, job_id: JobId) -> bool {
        self.entries
            .get(&job_id)
            .and_then(|ctx| ctx.pause.as_ref().map(PauseSource::pause))
            .unwrap_or(false)
    }

    /// Open the pause gate. `false` if the job has no pausable context or
    /// is not paused.
    pub fn resume(&self, job_id: JobId) -> bool {
        self.entries
            .get(&job_id)
            .and_then(|ctx| ctx.pause.as_ref().map(PauseSource::resume))
            .unwrap_or(false)
    }

    /// Remove the context for `job_id` unconditionally.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.entries.remove(&job_id).is_some()
    }

    /// Raise cancellation and drop the context.
    pub fn release(&self, job_id: JobId) -> bool {
        match self.entries.remove(&job_id) {
            Some((_, ctx)) => {
                ctx.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Mark the handle's execution finished and drop its entry, unless the
    /// entry has since been replaced by a newer execution.
    pub(crate) fn finish(&self, handle: &ExecutionHandle) {
        handle.finished.cancel();
        self.entries
            .remove_if(&handle.job_id, |_, ctx| ctx.generation == handle.generation);
    }

    /// Ids of all jobs with a context.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of contexts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait until every execution registered at call time has unwound.
    pub async fn wait_finished(&self) {
        let pending: Vec<CancellationToken> = self
            .entries
            .iter()
            .map(|entry| entry.value().finished.clone())
            .collect();
        join_all(pending.iter().map(CancellationToken::cancelled)).await;
    }
}
