//! `[logging]` section.

use serde::{Deserialize, Serialize};

/// tracing-subscriber setup. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `"info"` or `"shift_worker=debug,info"`.
    pub level: String,
    /// `"json"` for one object per line, anything else for human output.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
