//! Job status and command enumerations.

use serde::{Deserialize, Serialize};
use shift_core::{AppError, AppResult};
use std::fmt;
use std::str::FromStr;

/// Status of a background job.
///
/// A job that has not started yet has no status at all; the store keeps
/// the column `NULL` and the model carries `Option<JobStatus>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Currently executing in the owning worker.
    Running,
    /// Suspended at the handler's pause checkpoint.
    Paused,
    /// Stopped after a cancellation request.
    Stopped,
    /// Finished normally.
    Completed,
    /// Failed; the job's error text holds the details.
    Error,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parse a status filter entry. `"none"` selects jobs without a status.
    pub fn parse_filter(value: &str) -> AppResult<Option<Self>> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "null" | "" => Ok(None),
            other => other.parse().map(Some),
        }
    }

    /// Label used for jobs without a status.
    pub fn label(status: Option<Self>) -> &'static str {
        status.map(|s| s.as_str()).unwrap_or("none")
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(AppError::validation(format!("Unknown job status '{other}'"))),
        }
    }
}

/// Operator or client intent recorded on a job, acted on by the owning
/// worker's next poll or cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_command", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobCommand {
    /// Cancel the job.
    Stop,
    /// Suspend a running job.
    Pause,
    /// Resume a paused job.
    Continue,
    /// Move an unstarted job to the front of the queue.
    RunNow,
}

impl JobCommand {
    /// Return the command as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Continue => "continue",
            Self::RunNow => "run_now",
        }
    }

    /// Whether a job in the given state accepts this command.
    ///
    /// Stop applies to running, paused, and unstarted jobs. Run-now applies
    /// only to jobs nobody has claimed. Pause needs a running job and
    /// continue a paused one.
    pub fn applies_to(&self, status: Option<JobStatus>, process_id: Option<&str>) -> bool {
        match self {
            Self::Stop => matches!(
                status,
                None | Some(JobStatus::Running) | Some(JobStatus::Paused)
            ),
            Self::RunNow => status.is_none() && process_id.is_none(),
            Self::Pause => status == Some(JobStatus::Running),
            Self::Continue => status == Some(JobStatus::Paused),
        }
    }

    /// SQL predicate equivalent to [`JobCommand::applies_to`].
    pub fn sql_guard(&self) -> &'static str {
        match self {
            Self::Stop => "(status IS NULL OR status IN ('running', 'paused'))",
            Self::RunNow => "(status IS NULL AND process_id IS NULL)",
            Self::Pause => "status = 'running'",
            Self::Continue => "status = 'paused'",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(JobStatus::parse_filter("none").unwrap(), None);
        assert_eq!(
            JobStatus::parse_filter("Completed").unwrap(),
            Some(JobStatus::Completed)
        );
        assert!(JobStatus::parse_filter("finished").is_err());
    }

    #[test]
    fn test_command_guards() {
        assert!(JobCommand::Stop.applies_to(None, None));
        assert!(JobCommand::Stop.applies_to(Some(JobStatus::Paused), Some("p-0")));
        assert!(!JobCommand::Stop.applies_to(Some(JobStatus::Completed), Some("p-0")));
        assert!(JobCommand::RunNow.applies_to(None, None));
        assert!(!JobCommand::RunNow.applies_to(None, Some("p-0")));
        assert!(JobCommand::Pause.applies_to(Some(JobStatus::Running), Some("p-0")));
        assert!(!JobCommand::Pause.applies_to(Some(JobStatus::Paused), Some("p-0")));
        assert!(JobCommand::Continue.applies_to(Some(JobStatus::Paused), Some("p-0")));
    }

    #[test]
    fn test_command_serde() {
        let json = serde_json::to_string(&JobCommand::RunNow).unwrap();
        assert_eq!(json, "\"run_now\"");
    }
}
