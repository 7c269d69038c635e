//! # Logging Setup
//!
//! Installs the global `tracing` subscriber: a non-blocking file layer that is always on,
//! plus an optional console layer on stderr so stdout stays free for the transcript.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::domain::config::LoggingConfig;

/// Noisy dependencies are capped at `warn` unless `RUST_LOG` says otherwise.
fn default_directives(level: &str) -> String {
    format!("{level},rmcp=warn,reqwest=warn,hyper=warn")
}

/// Initializes logging. Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let dir = match config.file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = config
        .file
        .file_name()
        .context("logging.file must name a file")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    // One log per session
    if config.file.exists() {
        let _ = std::fs::remove_file(&config.file);
    }

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let console_layer = config
        .console
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
