pub mod agent;
pub mod cluster;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod montage;
pub mod orchestrator;
pub mod policy;
pub mod query_log;
pub mod redaction;
pub mod render;
pub mod resolver;
pub mod session;
pub mod store;

pub use crate::errors::{AppError, AppResult};
pub use crate::orchestrator::{Orchestrator, TurnReport};
pub use crate::session::Session;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to a daily file under `log_dir`. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "eeg-insight.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
