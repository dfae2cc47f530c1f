//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and, when a log file can be opened, to
//! that file through a non-blocking writer so logging never stalls the generation loop.
//! `RAGPIPE_LOG_FILE` overrides the default location of `logs/ragpipe.log`.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking writer flushing for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the tracing subscriber: compact stdout layer plus an optional file layer.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. A file that cannot be opened
/// downgrades to stdout-only logging instead of failing startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer);

    match open_log_file() {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

fn log_file_path() -> PathBuf {
    std::env::var("RAGPIPE_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs").join("ragpipe.log"))
}

/// Open the log file in append mode, creating its parent directory when needed.
fn open_log_file() -> Option<File> {
    let path = log_file_path();
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Err(error) = std::fs::create_dir_all(parent) {
            eprintln!("Failed to create log directory {}: {error}", parent.display());
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(error) => {
            eprintln!("Failed to open log file {}: {error}", path.display());
            None
        }
    }
}
