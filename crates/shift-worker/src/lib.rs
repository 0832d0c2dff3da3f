//! Background job scheduling and execution for Shift.
//!
//! This crate provides:
//! - A [`Worker`] that claims runnable jobs from the job store and runs
//!   them, and acts on stop, pause, and continue commands
//! - A throttled progress reporter feeding the progress cache and the store
//! - A cleanup sweep that repairs divergence between the store and the
//!   in-memory execution state
//! - A [`JobServer`] running several workers on poll and cleanup timers
//! - A [`JobClient`] for enqueuing and managing jobs
//! - A built-in shell command handler

pub mod client;
pub mod context;
pub mod execution;
pub mod jobs;
pub mod progress;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod signals;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{JobClient, JobRequest};
pub use execution::ExecutionOutcome;
pub use reconciler::CleanupReport;
pub use registry::{HandlerRegistry, JobArguments, JobContext, JobError, JobHandler};
pub use server::JobServer;
pub use worker::{Worker, WorkerSettings};
