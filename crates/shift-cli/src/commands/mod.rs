//! CLI command definitions and dispatch.

pub mod control;
pub mod job;
pub mod migrate;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use shift_cache::{CacheManager, CachedJobProgress};
use shift_core::config::AppConfig;
use shift_core::error::AppError;
use shift_core::traits::PlaintextCipher;
use shift_core::types::JobId;
use shift_worker::JobClient;

use crate::output::{self, OutputFormat};

/// Shift: distributed background job management
#[derive(Debug, Parser)]
#[command(name = "shift", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding default.toml and environment overlays
    #[arg(short, long, default_value = "config")]
    pub config: String,

    /// Environment overlay to load (e.g. `production` loads production.toml)
    #[arg(short, long, env = "SHIFT_ENV", default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enqueue a job
    Add(job::AddArgs),
    /// Show a job
    Show {
        /// Job id
        id: JobId,
    },
    /// Show a job's latest status and progress
    Progress {
        /// Job id
        id: JobId,
    },
    /// List jobs with their latest progress
    List(job::ListArgs),
    /// Ask jobs to stop
    Stop(control::IdsArgs),
    /// Ask running jobs to pause
    Pause(control::IdsArgs),
    /// Ask paused jobs to continue
    Continue(control::IdsArgs),
    /// Move unclaimed jobs to the front of the queue
    RunNow(control::IdsArgs),
    /// Clear run state of non-running jobs so they run again
    Reset(control::IdsArgs),
    /// Delete non-running jobs
    Delete(control::DeleteArgs),
    /// Job counts per status
    Status(status::StatusArgs),
    /// Apply job store migrations
    Migrate,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = self.load_config()?;
        if let Commands::Migrate = &self.command {
            return migrate::execute(&config).await;
        }

        let client = connect_client(&config).await?;
        match &self.command {
            Commands::Add(args) => job::add(&client, args).await,
            Commands::Show { id } => job::show(&client, *id, self.format).await,
            Commands::Progress { id } => job::progress(&client, *id, self.format).await,
            Commands::List(args) => job::list(&client, args, self.format).await,
            Commands::Stop(args) => control::stop(&client, args).await,
            Commands::Pause(args) => control::pause(&client, args).await,
            Commands::Continue(args) => control::resume(&client, args).await,
            Commands::RunNow(args) => control::run_now(&client, args).await,
            Commands::Reset(args) => control::reset(&client, args).await,
            Commands::Delete(args) => control::delete(&client, args).await,
            Commands::Status(args) => status::execute(&client, args, self.format).await,
            Commands::Migrate => Ok(()),
        }
    }

    fn load_config(&self) -> Result<AppConfig, AppError> {
        AppConfig::load_from(&self.config, &self.env)
    }
}

/// Helper: build a job client from configuration
pub async fn connect_client(config: &AppConfig) -> Result<JobClient, AppError> {
    if config.database.provider == "memory" {
        output::print_warning(
            "database.provider is 'memory'; jobs are not shared with any running server",
        );
    }
    let store = shift_database::connect_store(&config.database).await?;
    let cache = CacheManager::new(&config.cache).await?;
    let progress = CachedJobProgress::new(
        cache,
        Duration::from_secs(config.cache.progress_ttl_seconds),
    );
    Ok(JobClient::new(
        store,
        Arc::new(progress),
        Arc::new(PlaintextCipher),
    ))
}
