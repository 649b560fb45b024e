//! Application logger.
//!
//! Builds a standalone `tracing` dispatcher from [`LogConfig`]. The process
//! subscriber installed by the binary is left alone; callers route their
//! own records through [`Logger::in_scope`] or [`Logger::dispatch`].

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

use crate::components::{Component, ComponentError, ComponentKind};
use crate::config::validation::{self, ValidationError};
use crate::config::{AppConfig, LogConfig};

/// File name used under `log_dir` for file output.
pub const LOG_FILE_NAME: &str = "app.log";

pub struct Logger {
    config: LogConfig,
    dispatch: Dispatch,
}

impl Logger {
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run `f` with this logger as the thread's default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Path written to when the destination is `file`.
    pub fn file_path(config: &LogConfig) -> PathBuf {
        Path::new(&config.log_dir).join(LOG_FILE_NAME)
    }

    fn level(config: &LogConfig) -> Result<LevelFilter, ComponentError> {
        let level = match config.level.to_ascii_lowercase().as_str() {
            "" | "info" => LevelFilter::INFO,
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            other => {
                return Err(ComponentError::InvalidConfig {
                    kind: ComponentKind::Logger,
                    reason: format!("level '{}'", other),
                })
            }
        };
        Ok(level)
    }

    fn writer(config: &LogConfig) -> Result<(BoxMakeWriter, bool), ComponentError> {
        match config.log.to_ascii_lowercase().as_str() {
            "" | "console" | "stdout" => Ok((BoxMakeWriter::new(std::io::stdout), true)),
            "stderr" => Ok((BoxMakeWriter::new(std::io::stderr), true)),
            "file" => {
                let path = Self::file_path(config);
                let file = fs::create_dir_all(&config.log_dir)
                    .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
                    .map_err(|e| ComponentError::InvalidConfig {
                        kind: ComponentKind::Logger,
                        reason: format!("cannot open {}: {}", path.display(), e),
                    })?;
                Ok((BoxMakeWriter::new(Mutex::new(file)), false))
            }
            "kafka" => Err(ComponentError::Unsupported {
                kind: ComponentKind::Logger,
                reason: "kafka destination".to_string(),
            }),
            other => Err(ComponentError::InvalidConfig {
                kind: ComponentKind::Logger,
                reason: format!("destination '{}'", other),
            }),
        }
    }
}

impl Component for Logger {
    type Config = LogConfig;

    const KIND: ComponentKind = ComponentKind::Logger;

    fn section(config: &AppConfig) -> &LogConfig {
        &config.logging
    }

    /// The logger has no switch; it always exists.
    fn enabled(_config: &LogConfig) -> bool {
        true
    }

    fn validate(config: &LogConfig) -> Result<(), Vec<ValidationError>> {
        validation::check_logging(config)
    }

    fn build(config: &LogConfig) -> Result<Self, ComponentError> {
        let level = Self::level(config)?;
        let (writer, ansi) = Self::writer(config)?;
        let report_caller = !config.disable_report_caller;

        let base = tracing_subscriber::registry().with(level);
        let dispatch = match config.format.to_ascii_lowercase().as_str() {
            "" | "text" => Dispatch::new(
                base.with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(ansi)
                        .with_file(report_caller)
                        .with_line_number(report_caller),
                ),
            ),
            "json" => Dispatch::new(
                base.with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_file(report_caller)
                        .with_line_number(report_caller),
                ),
            ),
            other => {
                return Err(ComponentError::InvalidConfig {
                    kind: ComponentKind::Logger,
                    reason: format!("format '{}'", other),
                })
            }
        };

        tracing::info!(
            destination = %config.log,
            level = %level,
            format = %config.format,
            "Logger ready"
        );
        Ok(Self {
            config: config.clone(),
            dispatch,
        })
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("destination", &self.config.log)
            .field("level", &self.config.level)
            .field("format", &self.config.format)
            .finish()
    }
}
