//! Job store migration command.

use shift_core::config::AppConfig;
use shift_core::error::AppError;
use shift_database::DatabasePool;

use crate::output;

/// Apply pending migrations to the configured PostgreSQL job store
pub async fn execute(config: &AppConfig) -> Result<(), AppError> {
    if config.database.provider != "postgres" {
        output::print_warning(&format!(
            "database.provider is '{}'; nothing to migrate",
            config.database.provider
        ));
        return Ok(());
    }

    let pool = DatabasePool::connect(&config.database).await?;
    println!("Running job store migrations...");
    shift_database::migration::run_migrations(pool.pool()).await?;
    output::print_success("All migrations applied successfully.");
    pool.close().await;
    Ok(())
}
