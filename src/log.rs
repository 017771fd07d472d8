// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-action log files.
//!
//! Every action appends leveled, timestamped lines to its own log file under
//! the logs root. Each entry is also mirrored to the console through
//! [`tracing`], so the subscriber decides which channel a level lands on.
//!
//! # Log File Layout
//!
//! One entry per line, `<stamp> <Level> <message>`, where `<stamp>` comes
//! from [`Clock::now_stamp`]. Files are append-only. The sink never
//! truncates them.
//!
//! # Best Effort
//!
//! Logging must never abort provisioning work. If the logs root cannot be
//! created, or the log file cannot be written, the entry is dropped and the
//! caller carries on.

use crate::clock::Clock;

use mkdirp::mkdirp;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

/// File name of the dispatcher-level log.
///
/// The leading dot keeps it out of the valid action name space.
pub const DISPATCHER_LOG: &str = ".dispatcher.log";

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warning,
    Info,
    Debug,
}

impl Display for Level {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
            Self::Debug => "Debug",
        })
    }
}

/// Append-only log writer rooted at a logs directory.
#[derive(Debug, Clone)]
pub struct LogSink {
    logs_root: PathBuf,
    clock: Clock,
}

impl LogSink {
    /// Construct new log sink.
    pub fn new(logs_root: impl Into<PathBuf>, clock: Clock) -> Self {
        Self {
            logs_root: logs_root.into(),
            clock,
        }
    }

    /// Path of the log file that belongs to an action.
    pub fn log_path(&self, action: impl AsRef<str>) -> PathBuf {
        self.logs_root.join(format!("{}.log", action.as_ref()))
    }

    /// Path of the dispatcher-level log file.
    pub fn dispatcher_log_path(&self) -> PathBuf {
        self.logs_root.join(DISPATCHER_LOG)
    }

    /// Append one entry to an action's log, and mirror it to the console.
    pub fn append(&self, action: impl AsRef<str>, level: Level, message: impl AsRef<str>) {
        mirror(level, message.as_ref());
        self.append_line(&self.log_path(action), level, message.as_ref());
    }

    /// Append one entry to the dispatcher-level log, and mirror it to the
    /// console.
    pub fn append_dispatcher(&self, level: Level, message: impl AsRef<str>) {
        mirror(level, message.as_ref());
        self.append_line(&self.dispatcher_log_path(), level, message.as_ref());
    }

    /// Bind the sink to a single action.
    pub fn for_action(&self, action: impl Into<String>) -> ActionLog {
        ActionLog {
            sink: self.clone(),
            action: action.into(),
        }
    }

    fn append_line(&self, path: &Path, level: Level, message: &str) {
        let line = format!("{} {level} {message}\n", self.clock.now_stamp());
        if let Err(err) = write_line(path, &line) {
            debug!("dropped log entry for {:?}: {err}", path.display());
        }
    }
}

/// Log handle bound to one action.
#[derive(Debug, Clone)]
pub struct ActionLog {
    sink: LogSink,
    action: String,
}

impl ActionLog {
    /// Path of the underlying log file.
    pub fn path(&self) -> PathBuf {
        self.sink.log_path(&self.action)
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.sink.append(&self.action, level, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warning, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message);
    }
}

fn mirror(level: Level, message: &str) {
    match level {
        Level::Error => error!("{message}"),
        Level::Warning => warn!("{message}"),
        Level::Info => info!("{message}"),
        Level::Debug => debug!("{message}"),
    }
}

// INVARIANT: One write_all per entry, so an O_APPEND file never sees a torn line.
fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        mkdirp(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::read_to_string;

    #[test]
    fn append_creates_directories_and_appends_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = LogSink::new(dir.path().join("deep").join("logs"), Clock::new(Some("UTC".into())));

        sink.append("install-java", Level::Info, "Starting install-java (force=false)");
        sink.append("install-java", Level::Warning, "mirror slow");

        let content = read_to_string(sink.log_path("install-java"))?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("UTC "));
        assert!(lines[0].ends_with(" Info Starting install-java (force=false)"));
        assert!(lines[1].ends_with(" Warning mirror slow"));

        Ok(())
    }

    #[test]
    fn append_never_truncates_existing_log() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("node.log"), "old entry\n")?;
        let log = LogSink::new(dir.path(), Clock::default()).for_action("node");

        log.error("boom");

        let content = read_to_string(log.path())?;
        assert!(content.starts_with("old entry\n"));
        assert!(content.trim_end().ends_with(" Error boom"));

        Ok(())
    }

    #[test]
    fn unwritable_logs_root_is_swallowed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "")?;
        let sink = LogSink::new(&blocker, Clock::default());

        sink.append("vscode", Level::Info, "still running");
        sink.append_dispatcher(Level::Info, "still running");

        assert!(!blocker.join("vscode.log").exists());

        Ok(())
    }

    #[test]
    fn dispatcher_log_is_separate_from_action_logs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = LogSink::new(dir.path(), Clock::default());

        sink.append_dispatcher(Level::Info, "run install-x rc=0");

        assert!(sink.dispatcher_log_path().exists());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        Ok(())
    }
}
