use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::Error;

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/media-duper.log";

/// Where and how verbosely a host process logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `media_duper_core=debug`.
    pub level: String,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    /// `TRACING_LEVEL` and `LOG_FILE_PATH`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env::var("TRACING_LEVEL").unwrap_or(defaults.level),
            file: env::var_os("LOG_FILE_PATH").map(PathBuf::from).unwrap_or(defaults.file),
        }
    }

    /// Split the log file into the directory the appender writes to and the file name.
    fn appender_parts(&self) -> (PathBuf, PathBuf) {
        let dir = match self.file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = self
            .file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("media-duper.log"));
        (dir, name)
    }
}

/// Install stdout and file logging configured from the environment.
pub fn init_logger() -> Result<WorkerGuard, Error> {
    init_logger_with(&LogSettings::from_env())
}

/// Install stdout and file logging. Keep the returned guard alive until exit so
/// buffered file output is flushed. A second install fails instead of panicking.
pub fn init_logger_with(settings: &LogSettings) -> Result<WorkerGuard, Error> {
    let filter = EnvFilter::try_new(&settings.level)
        .map_err(|e| Error::Other(format!("Invalid log filter '{}': {}", settings.level, e)))?;

    let (dir, name) = settings.appender_parts();
    fs::create_dir_all(&dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &name));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Other(format!("Logger already installed: {}", e)))?;

    info!("Logging at '{}' to stdout and {}", settings.level, dir.join(&name).display());
    Ok(guard)
}
