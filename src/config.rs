//! Database configuration

use std::path::PathBuf;

/// Default tracing filter used by the demo binary
pub const DEFAULT_LOG_FILTER: &str = "scopedb=info";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// JSON schema description to load at startup
    pub schema_path: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the schema file
    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Set the log filter directive
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}
