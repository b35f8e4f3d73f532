//! C9: a single-writer, timestamped, severity-tagged logger.
//!
//! Implemented as a `log::Log` backend so both the hub's own diagnostics
//! (logged with `target: "Hub"`) and client-submitted `LOG` messages
//! (logged with `target: <app-name>`) go through one code path and one
//! write lock, per spec.md §4.9.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Hub severities, distinct from `log::Level` because the wire protocol and
/// config file both speak this six-level scale (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Normal,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn name(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Normal => "NORMAL",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn from_wire(n: i64) -> anyhow::Result<Severity> {
        match n {
            0 => Ok(Severity::Debug),
            1 => Ok(Severity::Info),
            2 => Ok(Severity::Normal),
            3 => Ok(Severity::Warning),
            4 => Ok(Severity::Error),
            5 => Ok(Severity::Critical),
            other => Err(anyhow!("unknown log level {}", other)),
        }
    }

    pub fn from_name(name: &str) -> anyhow::Result<Severity> {
        match name {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "NORMAL" => Ok(Severity::Normal),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(anyhow!("unknown log level name '{}'", other)),
        }
    }

    /// Maps onto the `log` crate's coarser level scale so the facade's
    /// filtering still makes sense; NORMAL sits between INFO and WARN.
    pub fn to_log_level(self) -> Level {
        match self {
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Normal => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error => Level::Error,
            Severity::Critical => Level::Error,
        }
    }

    fn from_log_level(level: Level) -> Severity {
        match level {
            Level::Trace => Severity::Debug,
            Level::Debug => Severity::Debug,
            Level::Info => Severity::Info,
            Level::Warn => Severity::Warning,
            Level::Error => Severity::Error,
        }
    }
}

struct Sink {
    file: Option<File>,
    /// Mirrors spec.md §4.9: stdout is used if no file is configured, or
    /// additionally when `log_replicate_stdout` is set.
    replicate_stdout: bool,
}

pub struct Logger {
    min_level: Severity,
    sink: Mutex<Sink>,
}

impl Logger {
    pub fn new(log_file: Option<&str>, replicate_stdout: bool, min_level: Severity) -> anyhow::Result<Logger> {
        let file = match log_file {
            Some(path) if !path.trim().is_empty() => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file '{}'", path))?,
            ),
            _ => None,
        };
        let stdout_always = file.is_none();

        Ok(Logger {
            min_level,
            sink: Mutex::new(Sink { file, replicate_stdout: replicate_stdout || stdout_always }),
        })
    }

    pub fn log_line(&self, severity: Severity, app: &str, msg: &str) {
        if severity < self.min_level {
            return;
        }

        let line = format!(
            "[{}][{}][{}] {}\n",
            Local::now().format("%H:%M:%S"),
            app,
            severity.name(),
            msg
        );

        let mut sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        if sink.replicate_stdout || sink.file.is_none() {
            let _ = io::stdout().write_all(line.as_bytes());
        }
        if let Some(file) = sink.file.as_mut() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    /// Install this logger as the process-wide `log` backend.
    pub fn install(self) -> anyhow::Result<()> {
        let max = self.min_level.to_log_level().to_level_filter();
        log::set_boxed_logger(Box::new(self))
            .map_err(|e| anyhow!("installing logger: {}", e))?;
        log::set_max_level(LevelFilter::Trace.max(max));
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        Severity::from_log_level(metadata.level()) >= self.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let severity = Severity::from_log_level(record.level());
        let app = record.target();
        let app = if app.is_empty() { "Hub" } else { app };
        self.log_line(severity, app, &record.args().to_string());
    }

    fn flush(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(file) = sink.file.as_mut() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_app_tagged_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.log");
        let logger = Logger::new(Some(path.to_str().unwrap()), false, Severity::Debug).unwrap();
        logger.log_line(Severity::Warning, "sonar", "low battery");

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("[sonar][WARNING] low battery"));
    }

    #[test]
    fn drops_messages_below_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.log");
        let logger = Logger::new(Some(path.to_str().unwrap()), false, Severity::Error).unwrap();
        logger.log_line(Severity::Debug, "Hub", "should not appear");

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.is_empty());
    }
}
