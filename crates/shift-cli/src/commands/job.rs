//! Job creation and inspection commands.

use clap::Args;
use serde_json::Value;

use shift_core::error::AppError;
use shift_core::types::{JobId, PageRequest};
use shift_worker::{JobClient, JobRequest};

use crate::output::{self, JobRow, OutputFormat, ProgressRow};

/// Arguments for the add command
#[derive(Debug, Args)]
pub struct AddArgs {
    /// Target type name (e.g. `shell`)
    pub type_name: String,
    /// Method on the target type (e.g. `run`)
    pub method: String,
    /// Argument as `TYPE=JSON`, repeatable, in call order
    #[arg(short, long = "arg", value_parser = parse_argument)]
    pub args: Vec<(String, Value)>,
    /// Owning application
    #[arg(long)]
    pub app_id: Option<String>,
    /// Owning user
    #[arg(long)]
    pub user_id: Option<String>,
    /// Free-form job type
    #[arg(long)]
    pub job_type: Option<String>,
    /// Human-readable name
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for the list command
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Page number (1-based)
    #[arg(short, long, default_value_t = 1)]
    pub page: u64,
    /// Jobs per page
    #[arg(short = 's', long, default_value_t = 25)]
    pub page_size: u64,
}

/// Parse `TYPE=JSON`. A value that is not valid JSON is taken as a string.
fn parse_argument(raw: &str) -> Result<(String, Value), String> {
    let (parameter_type, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=JSON, got '{raw}'"))?;
    if parameter_type.is_empty() {
        return Err(format!("missing parameter type in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((parameter_type.to_string(), value))
}

/// Enqueue a job
pub async fn add(client: &JobClient, args: &AddArgs) -> Result<(), AppError> {
    let mut request = JobRequest::new(&args.type_name, &args.method);
    for (parameter_type, value) in &args.args {
        request = request.arg(parameter_type, value.clone());
    }
    if let Some(app_id) = &args.app_id {
        request = request.with_app_id(app_id);
    }
    if let Some(user_id) = &args.user_id {
        request = request.with_user_id(user_id);
    }
    if let Some(job_type) = &args.job_type {
        request = request.with_job_type(job_type);
    }
    if let Some(name) = &args.name {
        request = request.with_job_name(name);
    }

    let job_id = client.add(request).await?;
    output::print_success(&format!("Job added (id: {job_id})"));
    Ok(())
}

/// Show a job
pub async fn show(client: &JobClient, id: JobId, format: OutputFormat) -> Result<(), AppError> {
    let job = client
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
    output::print_item(&job, format);
    Ok(())
}

/// Show a job's progress
pub async fn progress(client: &JobClient, id: JobId, format: OutputFormat) -> Result<(), AppError> {
    let progress = client
        .get_progress(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
    output::print_list(&[ProgressRow::from(&progress)], format);
    Ok(())
}

/// List jobs
pub async fn list(client: &JobClient, args: &ListArgs, format: OutputFormat) -> Result<(), AppError> {
    let page = client
        .list_jobs(&PageRequest::new(args.page, args.page_size))
        .await?;
    let rows: Vec<JobRow> = page.items.iter().map(JobRow::from).collect();
    output::print_list(&rows, format);
    if format == OutputFormat::Table {
        println!(
            "Page {}/{} ({} jobs)",
            page.page,
            page.total_pages.max(1),
            page.total_items
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_argument() {
        let (ty, value) = parse_argument("i32=3").unwrap();
        assert_eq!(ty, "i32");
        assert_eq!(value, Value::from(3));

        let (_, value) = parse_argument("string=echo hi").unwrap();
        assert_eq!(value, Value::from("echo hi"));

        let (_, value) = parse_argument(r#"string="a=b""#).unwrap();
        assert_eq!(value, Value::from("a=b"));

        assert!(parse_argument("no-separator").is_err());
        assert!(parse_argument("=3").is_err());
    }
}
