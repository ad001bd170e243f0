//! Process-wide `tracing` initialization: the standard
//! `FmtSubscriber`/`EnvFilter` setup shared by the binary's entry point.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { level: Level::INFO, format: LogFormat::Pretty }
    }
}

impl TracingConfig {
    /// Reads `RUST_LOG` for the base level, falling back to `level` when unset.
    pub fn from_env(default: TracingConfig) -> Self {
        let level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default.level);
        Self { level, format: default.format }
    }
}

/// Installs a process-global subscriber. Call once at startup.
pub fn init(config: TracingConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::new(config.level.to_string());

    match config.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).json().finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Pretty => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    }
}
