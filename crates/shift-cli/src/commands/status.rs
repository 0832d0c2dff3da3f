//! Job status summary command.

use clap::Args;

use shift_core::error::AppError;
use shift_worker::JobClient;

use crate::output::{self, OutputFormat};

/// Arguments for the status command
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Only count jobs of this application
    #[arg(long)]
    pub app_id: Option<String>,
    /// Only count jobs of this user
    #[arg(long)]
    pub user_id: Option<String>,
}

/// Print job counts per status
pub async fn execute(
    client: &JobClient,
    args: &StatusArgs,
    format: OutputFormat,
) -> Result<(), AppError> {
    let counts = client
        .status_counts(args.app_id.as_deref(), args.user_id.as_deref())
        .await?;

    match format {
        OutputFormat::Json => output::print_item(&counts, format),
        OutputFormat::Table => {
            println!("Job Status:");
            output::print_kv("Not started", &counts.not_started.to_string());
            output::print_kv("Running", &counts.running.to_string());
            output::print_kv("Paused", &counts.paused.to_string());
            output::print_kv("Stopped", &counts.stopped.to_string());
            output::print_kv("Completed", &counts.completed.to_string());
            output::print_kv("Error", &counts.error.to_string());
            output::print_kv("Total", &counts.total.to_string());
        }
    }
    Ok(())
}
