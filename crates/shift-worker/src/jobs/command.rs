//! Shell command handler.
//!
//! Runs a command line through `sh -c` as a child process. Each line the
//! command writes to stdout becomes a progress note. The child is killed
//! when the job is stopped, and no further output is read while the job
//! is paused.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use shift_entity::job::ProgressInfo;

use crate::registry::{JobArguments, JobContext, JobError, JobHandler};

/// Type name jobs use to target this handler.
pub const TYPE_NAME: &str = "shell";
/// Method name jobs use to target this handler.
pub const METHOD: &str = "run";

/// Maximum stderr characters kept in the job's error text.
const STDERR_LIMIT: usize = 2000;

/// Runs `sh -c <command>`; takes a single string argument.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandHandler;

impl CommandHandler {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn method(&self) -> &str {
        METHOD
    }

    fn parameter_types(&self) -> &[&'static str] {
        &["string"]
    }

    fn declares_pause(&self) -> bool {
        true
    }

    async fn execute(&self, mut ctx: JobContext, args: JobArguments) -> Result<(), JobError> {
        let command_line = args
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| JobError::Failed("Expected a command line string".to_string()))?
            .to_string();

        tracing::info!(job_id = %ctx.job_id, command = %command_line, "Running shell command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Failed(format!("Failed to start command: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::Failed("Command stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| JobError::Failed("Command stderr unavailable".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let cancel = ctx.cancel.clone();
        loop {
            if let Err(e) = ctx.checkpoint().await {
                let _ = child.kill().await;
                return Err(e);
            }

            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job_id = %ctx.job_id, "Killing cancelled shell command");
                    let _ = child.kill().await;
                    return Err(JobError::Cancelled);
                }
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => ctx.report(ProgressInfo::note(line)),
                Ok(None) => break,
                Err(e) => {
                    let _ = child.kill().await;
                    return Err(JobError::Failed(format!("Failed to read command output: {e}")));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JobError::Failed(format!("Failed to wait for command: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            ctx.report(ProgressInfo::percent(100));
            return Ok(());
        }

        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            match status.code() {
                Some(code) => format!("Command exited with code {code}"),
                None => "Command terminated by signal".to_string(),
            }
        } else {
            stderr.chars().take(STDERR_LIMIT).collect()
        };
        Err(JobError::Failed(message))
    }
}
