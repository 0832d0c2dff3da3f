//! Table and JSON output formatting for CLI commands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::{Table, Tabled};

use shift_entity::job::{CachedProgress, JobStatus, JobView};

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// One row of the job listing
#[derive(Debug, Serialize, Tabled)]
pub struct JobRow {
    /// Job id
    #[tabled(rename = "ID")]
    pub id: String,
    /// Job name
    #[tabled(rename = "Name")]
    pub name: String,
    /// Handler key
    #[tabled(rename = "Handler")]
    pub handler: String,
    /// Status label
    #[tabled(rename = "Status")]
    pub status: String,
    /// Pending command
    #[tabled(rename = "Command")]
    pub command: String,
    /// Owning worker
    #[tabled(rename = "Worker")]
    pub worker: String,
    /// Completion percentage
    #[tabled(rename = "%")]
    pub percent: String,
    /// Enqueue time
    #[tabled(rename = "Created")]
    pub created: String,
}

impl From<&JobView> for JobRow {
    fn from(view: &JobView) -> Self {
        let job = &view.job;
        Self {
            id: job.job_id.to_string(),
            name: job.job_name.clone().unwrap_or_default(),
            handler: job.invoke_meta.key(),
            status: JobStatus::label(job.status).to_string(),
            command: job.command.map(|c| c.to_string()).unwrap_or_default(),
            worker: job.process_id.clone().unwrap_or_default(),
            percent: percent(view.progress.as_ref().and_then(|p| p.percent)),
            created: timestamp(job.created_at),
        }
    }
}

/// Progress of a single job
#[derive(Debug, Serialize, Tabled)]
pub struct ProgressRow {
    /// Job id
    #[tabled(rename = "ID")]
    pub id: String,
    /// Status label
    #[tabled(rename = "Status")]
    pub status: String,
    /// Completion percentage
    #[tabled(rename = "%")]
    pub percent: String,
    /// Latest note
    #[tabled(rename = "Note")]
    pub note: String,
    /// Accumulated error text
    #[tabled(rename = "Error")]
    pub error: String,
    /// Last update
    #[tabled(rename = "Updated")]
    pub updated: String,
}

impl From<&CachedProgress> for ProgressRow {
    fn from(progress: &CachedProgress) -> Self {
        Self {
            id: progress.job_id.to_string(),
            status: JobStatus::label(progress.status).to_string(),
            percent: percent(progress.percent),
            note: progress.note.clone().unwrap_or_default(),
            error: progress.error.clone().unwrap_or_default(),
            updated: timestamp(progress.updated),
        }
    }
}

fn percent(value: Option<i32>) -> String {
    value.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Print a list of items in the selected format
pub fn print_list<T: Serialize + Tabled>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No results found.");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string());
            println!("{json}");
        }
    }
}

/// Print a single item in the selected format
pub fn print_item<T: Serialize + std::fmt::Debug>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            println!("{item:#?}");
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(item).unwrap_or_else(|_| "{}".to_string());
            println!("{json}");
        }
    }
}

/// Print a success message
pub fn print_success(msg: &str) {
    println!("✓ {msg}");
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    eprintln!("⚠ {msg}");
}

/// Print an error message
pub fn print_error(msg: &str) {
    eprintln!("✗ {msg}");
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("  {:<24} {}", format!("{key}:"), value);
}
