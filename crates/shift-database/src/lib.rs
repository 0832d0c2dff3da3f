//! # shift-database
//!
//! The job store seam (`JobStore`) and its implementations: a PostgreSQL
//! repository with connection pooling and migrations, and an in-process
//! store for single-node use and tests.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

use std::sync::Arc;

use tracing::info;

use shift_core::config::DatabaseConfig;
use shift_core::error::AppError;
use shift_core::result::AppResult;

pub use connection::DatabasePool;
pub use memory::MemoryJobStore;
pub use repositories::JobRepository;
pub use store::JobStore;

/// Build the job store selected by `database.provider`.
pub async fn connect_store(config: &DatabaseConfig) -> AppResult<Arc<dyn JobStore>> {
    match config.provider.as_str() {
        "postgres" => {
            let pool = DatabasePool::connect(config).await?;
            if config.run_migrations {
                migration::run_migrations(pool.pool()).await?;
            }
            Ok(Arc::new(JobRepository::new(pool.into_pool())))
        }
        "memory" => {
            info!("Using in-memory job store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        other => Err(AppError::configuration(format!(
            "Unknown database provider: '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = DatabaseConfig {
            provider: "oracle".to_string(),
            ..Default::default()
        };
        let err = connect_store(&config).await.unwrap_err();
        assert!(err.is(shift_core::error::ErrorKind::Configuration));
    }
}
