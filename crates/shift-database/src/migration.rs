//! Embedded schema migrations for the `jobs` and `job_progress` tables.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

use shift_core::error::{AppError, ErrorKind};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Bring the schema up to date. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!(available = MIGRATOR.iter().count(), "Applying job store migrations");
    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(ErrorKind::Database, format!("Migration failed: {e}"), e)
    })
}
