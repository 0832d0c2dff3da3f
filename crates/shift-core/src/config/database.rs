//! `[database]` section: the durable job store.

use serde::{Deserialize, Serialize};

/// Job store backend and PostgreSQL pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `"postgres"` or `"memory"`. The memory store is lost on restart.
    pub provider: String,
    /// PostgreSQL URL, required for `provider = "postgres"`.
    pub url: String,
    /// Pool upper bound.
    pub max_connections: u32,
    /// Connections kept open while idle. Capped at `max_connections`.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub connect_timeout_seconds: u64,
    /// Idle connections are closed after this long.
    pub idle_timeout_seconds: u64,
    /// Apply pending migrations when the server starts.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 300,
            run_migrations: true,
        }
    }
}
