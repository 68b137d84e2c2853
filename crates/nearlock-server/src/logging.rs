//! Tracing setup for the daemon.
//!
//! The process normally runs under a service manager, so the primary sink
//! is stdout. Production deployments additionally mirror events as JSON
//! into a daily-rotated file so presence transitions can be audited after
//! the fact.

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking log writers flushing.
///
/// Dropping this loses buffered lines, so `main` holds it for the life of
/// the process.
#[must_use]
pub struct LogGuards {
    _writers: Vec<WorkerGuard>,
}

/// Installs the global subscriber and returns the writer guards.
///
/// The filter is taken from `RUST_LOG` when set, falling back to
/// `NEARLOCK_LOG_LEVEL` and then to `info`. Production mode disables ANSI
/// color on stdout (journald mangles it) and adds the JSON audit file.
///
/// # Errors
///
/// Returns an error when the filter directive does not parse or the log
/// directory cannot be created.
pub fn init(production: bool) -> anyhow::Result<LogGuards> {
    let fallback = std::env::var("NEARLOCK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&fallback))?;

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(!production);

    let mut writers = vec![stdout_guard];
    let file_layer = if production {
        let dir = log_directory();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(rolling::daily(&dir, "nearlock.log"));
        writers.push(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_target(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LogGuards { _writers: writers })
}

/// Audit-log directory: the conventional system path on Linux, the
/// per-user data directory elsewhere.
fn log_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/nearlock");
    }
    directories::ProjectDirs::from("", "", "nearlock")
        .map_or_else(|| PathBuf::from("logs"), |dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_nonempty() {
        assert!(!log_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_fallback_level_parses_as_filter() {
        EnvFilter::try_new("info").expect("default directive must parse");
        EnvFilter::try_new("nearlock_core=debug,info").expect("scoped directive must parse");
    }
}
