//! Job command, reset, and delete commands.

use clap::Args;

use shift_core::error::AppError;
use shift_core::types::JobId;
use shift_worker::JobClient;

use crate::output;

/// One or more job ids
#[derive(Debug, Args)]
pub struct IdsArgs {
    /// Job ids
    #[arg(required = true)]
    pub ids: Vec<JobId>,
}

/// Arguments for the delete command
#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Job ids
    #[arg(required = true)]
    pub ids: Vec<JobId>,
    /// Skip confirmation prompt
    #[arg(long)]
    pub force: bool,
}

fn report(action: &str, requested: usize, affected: u64) {
    if affected as usize == requested {
        output::print_success(&format!("{action}: {affected} job(s)"));
    } else {
        output::print_warning(&format!(
            "{action}: {affected} of {requested} job(s); the rest are missing or not in a state that accepts it"
        ));
    }
}

/// Flag jobs to stop
pub async fn stop(client: &JobClient, args: &IdsArgs) -> Result<(), AppError> {
    let affected = client.set_command_stop(&args.ids).await?;
    report("Stop requested", args.ids.len(), affected);
    Ok(())
}

/// Flag jobs to pause
pub async fn pause(client: &JobClient, args: &IdsArgs) -> Result<(), AppError> {
    let affected = client.set_command_pause(&args.ids).await?;
    report("Pause requested", args.ids.len(), affected);
    Ok(())
}

/// Flag jobs to continue
pub async fn resume(client: &JobClient, args: &IdsArgs) -> Result<(), AppError> {
    let affected = client.set_command_continue(&args.ids).await?;
    report("Continue requested", args.ids.len(), affected);
    Ok(())
}

/// Flag jobs to run next
pub async fn run_now(client: &JobClient, args: &IdsArgs) -> Result<(), AppError> {
    let affected = client.set_command_run_now(&args.ids).await?;
    report("Run-now requested", args.ids.len(), affected);
    Ok(())
}

/// Reset jobs
pub async fn reset(client: &JobClient, args: &IdsArgs) -> Result<(), AppError> {
    let affected = client.reset(&args.ids).await?;
    report("Reset", args.ids.len(), affected);
    Ok(())
}

/// Delete jobs
pub async fn delete(client: &JobClient, args: &DeleteArgs) -> Result<(), AppError> {
    if !args.force {
        let confirm = dialoguer::Confirm::new()
            .with_prompt(format!("Delete {} job(s)?", args.ids.len()))
            .default(false)
            .interact()
            .map_err(|e| AppError::internal(format!("Input error: {e}")))?;

        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let affected = client.delete(&args.ids).await?;
    report("Deleted", args.ids.len(), affected);
    Ok(())
}
