//! Tracing setup.
//!
//! Logs go to `<data-dir>/logs/choicelab.log` rather than the terminal, which
//! belongs to the participant. `CHOICELAB_LOG` takes an `EnvFilter` directive
//! and wins over `--verbose`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_ENV: &str = "CHOICELAB_LOG";
pub const LOG_FILE_NAME: &str = "choicelab.log";

/// Filter used when `CHOICELAB_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "choicelab=debug" } else { "choicelab=info" }
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(log_dir: &Path, verbose: bool, json: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .try_init()
    };
    installed.context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "choicelab=info");
        assert_eq!(default_directive(true), "choicelab=debug");
    }
}
