//! Tracing configuration and log routing.
//!
//! Every run logs to stdout. The file sink is picked from the environment:
//! - `DOCRAG_LOG_FILE=<path>` appends to that file
//! - `DOCRAG_LOG_FILE=off` disables file logging
//! - otherwise a daily-rotated `docrag.log` is written under `DOCRAG_LOG_DIR` (default `logs`)
//!
//! `RUST_LOG` overrides [`DEFAULT_FILTER`], which keeps the PDF and HTML parsers quiet.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "info,docrag=info,pdf_extract=error,lopdf=error,html5ever=warn,selectors=warn,hyper=warn";

const LOG_FILE_VAR: &str = "DOCRAG_LOG_FILE";
const LOG_DIR_VAR: &str = "DOCRAG_LOG_DIR";
const DEFAULT_LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "docrag.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Append to a single named file.
    File(PathBuf),
    /// Daily-rotated files in a directory.
    Rolling(PathBuf),
    /// Stdout only.
    Disabled,
}

impl LogSink {
    /// Resolve the sink from `DOCRAG_LOG_FILE` and `DOCRAG_LOG_DIR`.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var(LOG_FILE_VAR).ok().as_deref(),
            std::env::var(LOG_DIR_VAR).ok().as_deref(),
        )
    }

    fn resolve(file: Option<&str>, dir: Option<&str>) -> Self {
        match file.map(str::trim) {
            Some(value) if matches!(value.to_ascii_lowercase().as_str(), "off" | "none" | "false") => {
                Self::Disabled
            }
            Some(value) if !value.is_empty() => Self::File(PathBuf::from(value)),
            _ => {
                let dir = dir.map(str::trim).filter(|dir| !dir.is_empty());
                Self::Rolling(PathBuf::from(dir.unwrap_or(DEFAULT_LOG_DIR)))
            }
        }
    }

    fn writer(&self) -> Result<Option<NonBlocking>, std::io::Error> {
        let (writer, guard) = match self {
            Self::Disabled => return Ok(None),
            Self::File(path) => {
                if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            Self::Rolling(dir) => {
                std::fs::create_dir_all(dir)?;
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
            }
        };
        let _ = LOG_GUARD.set(guard);
        Ok(Some(writer))
    }

    fn location(&self) -> Option<&Path> {
        match self {
            Self::File(path) | Self::Rolling(path) => Some(path),
            Self::Disabled => None,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: a compact stdout layer plus the file sink from [`LogSink::from_env`].
///
/// A sink that cannot be opened degrades to stdout-only logging.
pub fn init_tracing() {
    let sink = LogSink::from_env();
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer);

    match sink.writer() {
        Ok(Some(writer)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            registry.with(file_layer).init();
            if let Some(location) = sink.location() {
                tracing::debug!(location = %location.display(), "File logging enabled");
            }
        }
        Ok(None) => registry.init(),
        Err(err) => {
            registry.init();
            if let Some(location) = sink.location() {
                tracing::warn!(location = %location.display(), error = %err, "File logging unavailable");
            }
        }
    }
}
