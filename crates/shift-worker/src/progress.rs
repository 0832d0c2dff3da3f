//! Progress reporting from handlers to the cache and the job store.
//!
//! Each execution gets a [`ProgressSink`] feeding two independent channels.
//! The cache channel receives every update. The store channel is
//! rate-limited: an update passes only when the store interval has elapsed
//! since the last durable write, or when it reports completion. One writer
//! task drains each channel so a slow backend never blocks the handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use shift_cache::ProgressCache;
use shift_core::types::JobId;
use shift_database::JobStore;
use shift_entity::job::ProgressInfo;

/// Decides which updates reach the durable store.
#[derive(Debug)]
pub(crate) struct StoreThrottle {
    interval: Duration,
    last_write: Option<Instant>,
}

impl StoreThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
        }
    }

    /// Treat `at` as the time of the most recent durable write.
    pub(crate) fn mark_written(&mut self, at: Instant) {
        self.last_write = Some(at);
    }

    /// Whether an update at `now` should be written, recording it if so.
    pub(crate) fn admit(&mut self, now: Instant, progress: &ProgressInfo) -> bool {
        let due = match self.last_write {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due || progress.is_complete() {
            self.last_write = Some(now);
            true
        } else {
            false
        }
    }
}

/// Handler-facing progress callback.
#[derive(Debug)]
pub struct ProgressSink {
    job_id: JobId,
    cache_tx: mpsc::UnboundedSender<ProgressInfo>,
    store_tx: mpsc::UnboundedSender<ProgressInfo>,
    throttle: StoreThrottle,
}

impl ProgressSink {
    pub(crate) fn new(
        job_id: JobId,
        cache_tx: mpsc::UnboundedSender<ProgressInfo>,
        store_tx: mpsc::UnboundedSender<ProgressInfo>,
        throttle: StoreThrottle,
    ) -> Self {
        Self {
            job_id,
            cache_tx,
            store_tx,
            throttle,
        }
    }

    /// Job this sink reports for.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Push an update. Never blocks and never fails; delivery is
    /// best-effort once the execution has finished. Percentages are
    /// clamped to `0..=100`.
    pub fn report(&mut self, mut progress: ProgressInfo) {
        progress.percent = progress.percent.map(|p| p.clamp(0, 100));
        if self.throttle.admit(Instant::now(), &progress) {
            let _ = self.store_tx.send(progress.clone());
        }
        let _ = self.cache_tx.send(progress);
    }
}

/// Writer tasks draining a sink's channels.
#[derive(Debug)]
pub(crate) struct ProgressWriters {
    cache: JoinHandle<()>,
    store: JoinHandle<()>,
}

impl ProgressWriters {
    /// Wait up to `limit` for both channels to drain, which happens once
    /// the sink is dropped. Returns `false` and aborts the writers when a
    /// sink outlives the limit.
    pub(crate) async fn flush(self, limit: Duration) -> bool {
        let cache_abort = self.cache.abort_handle();
        let store_abort = self.store.abort_handle();
        let drained = tokio::time::timeout(limit, async {
            let _ = self.cache.await;
            let _ = self.store.await;
        })
        .await
        .is_ok();
        if !drained {
            cache_abort.abort();
            store_abort.abort();
        }
        drained
    }
}

/// Create a sink for `job_id` and spawn its writer tasks.
///
/// The initial empty row is written by the caller, so the throttle starts
/// as if a durable write just happened.
pub(crate) fn spawn_reporter(
    job_id: JobId,
    store: Arc<dyn JobStore>,
    cache: Arc<dyn ProgressCache>,
    interval: Duration,
) -> (ProgressSink, ProgressWriters) {
    let (cache_tx, mut cache_rx) = mpsc::unbounded_channel::<ProgressInfo>();
    let (store_tx, mut store_rx) = mpsc::unbounded_channel::<ProgressInfo>();

    let cache_task = tokio::spawn(async move {
        while let Some(progress) = cache_rx.recv().await {
            if let Err(e) = cache.set_progress(job_id, &progress).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to cache progress");
            }
        }
    });

    let store_task = tokio::spawn(async move {
        while let Some(progress) = store_rx.recv().await {
            if let Err(e) = store.upsert_progress(job_id, &progress).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist progress");
            }
        }
    });

    let mut throttle = StoreThrottle::new(interval);
    throttle.mark_written(Instant::now());

    (
        ProgressSink::new(job_id, cache_tx, store_tx, throttle),
        ProgressWriters {
            cache: cache_task,
            store: store_task,
        },
    )
}
