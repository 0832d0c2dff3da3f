//! Handler registry: resolves a job's invoke descriptor to the handler that
//! runs it and decodes the job's arguments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use shift_core::error::AppError;
use shift_core::result::AppResult;
use shift_core::types::JobId;
use shift_entity::job::{InvokeMeta, ProgressInfo};

use crate::progress::ProgressSink;
use crate::signals::{CancellationToken, PauseToken};

/// Decoded job arguments, in call order.
pub type JobArguments = Vec<Value>;

/// Error returned by a job handler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The handler observed cancellation and unwound.
    #[error("Job cancelled")]
    Cancelled,

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Everything a handler receives besides its arguments.
#[derive(Debug)]
pub struct JobContext {
    /// Job being executed.
    pub job_id: JobId,
    /// Raised when the job is asked to stop.
    pub cancel: CancellationToken,
    /// Closed while the job is paused. Always open unless the handler
    /// declares pause support.
    pub pause: PauseToken,
    progress: ProgressSink,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        cancel: CancellationToken,
        pause: PauseToken,
        progress: ProgressSink,
    ) -> Self {
        Self {
            job_id,
            cancel,
            pause,
            progress,
        }
    }

    /// Whether cancellation has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`JobError::Cancelled`] if cancellation has been raised.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cooperative checkpoint: waits while paused, fails once cancelled.
    pub async fn checkpoint(&mut self) -> Result<(), JobError> {
        self.check_cancelled()?;
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.pause.wait_while_paused() => {}
        }
        self.check_cancelled()
    }

    /// Report progress.
    pub fn report(&mut self, progress: ProgressInfo) {
        self.progress.report(progress);
    }
}

/// A unit of work the worker can run.
///
/// Handlers are registered under `"{type_name}::{method}"`, the same key
/// jobs carry in their [`InvokeMeta`].
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug + 'static {
    /// Target type name.
    fn type_name(&self) -> &str;

    /// Method name.
    fn method(&self) -> &str;

    /// Parameter type names the handler accepts, in call order.
    fn parameter_types(&self) -> &[&'static str] {
        &[]
    }

    /// Whether the handler honours the pause gate.
    fn declares_pause(&self) -> bool {
        false
    }

    /// Run the job.
    ///
    /// `ctx` must not outlive the call. A context moved into a detached
    /// task keeps the progress writers open, and the worker stops waiting
    /// for them after a bounded delay, dropping later updates.
    async fn execute(&self, ctx: JobContext, args: JobArguments) -> Result<(), JobError>;
}

/// Registered handlers keyed by `"{type_name}::{method}"`.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same key.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let key = format!("{}::{}", handler.type_name(), handler.method());
        tracing::info!(handler = %key, "Registered job handler");
        self.handlers.insert(key, handler);
    }

    /// Find the handler for a descriptor. The descriptor's parameter types
    /// must match the handler's exactly.
    pub fn resolve(&self, meta: &InvokeMeta) -> AppResult<Arc<dyn JobHandler>> {
        let key = meta.key();
        let handler = self
            .handlers
            .get(&key)
            .ok_or_else(|| AppError::dispatch(format!("No handler registered for '{key}'")))?;

        let declared = handler.parameter_types();
        let matches = meta.parameter_types.len() == declared.len()
            && meta
                .parameter_types
                .iter()
                .zip(declared)
                .all(|(given, expected)| given == expected);
        if !matches {
            return Err(AppError::dispatch(format!(
                "Handler '{key}' expects parameters ({}), job declares ({})",
                declared.join(", "),
                meta.parameter_types.join(", ")
            )));
        }
        Ok(Arc::clone(handler))
    }

    /// Decode serialized arguments for `handler`.
    pub fn deserialize_arguments(
        &self,
        handler: &dyn JobHandler,
        serialized: &str,
    ) -> AppResult<JobArguments> {
        let args: JobArguments = if serialized.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(serialized).map_err(|e| {
                AppError::with_source(
                    shift_core::error::ErrorKind::Dispatch,
                    format!("Invalid job arguments: {e}"),
                    e,
                )
            })?
        };

        let expected = handler.parameter_types().len();
        if args.len() != expected {
            return Err(AppError::dispatch(format!(
                "Handler '{}::{}' expects {expected} argument(s), got {}",
                handler.type_name(),
                handler.method(),
                args.len()
            )));
        }
        Ok(args)
    }

    /// Check if a handler is registered for a key.
    pub fn has_handler(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }
}
