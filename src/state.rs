// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persisted outcome of each action's most recent run.
//!
//! Every action owns exactly one __state record__ stored at
//! `<state_root>/<action>.state`. The record is what makes re-running an
//! action cheap: a record whose status is `success` lets the next run skip
//! its provisioning work entirely.
//!
//! # State File Layout
//!
//! ```text
//! action=<name>
//! status=success|failed|skipped
//! rc=<int>
//! started_at=<RFC 3339>
//! finished_at=<RFC 3339>
//! user=<string>
//! host=<string>
//! log_path=<string>
//! version=<string>
//! ```
//!
//! Keys are written in the order above, but readers do not depend on it.
//! See [`kv`] for the exact text rules.
//!
//! # Atomic Replacement
//!
//! A record is never overwritten in place. It is written to a temporary file
//! in the same directory, synced, and then renamed over the destination. A
//! crash at any point leaves either the old record or the new one, never a
//! mix of both.

pub mod kv;

use crate::state::kv::{KvDocument, KvError};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use mkdirp::mkdirp;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_dir, read_to_string},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Outcome of an action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
    Skipped,
}

impl Status {
    /// Only a successful run licenses skipping the next one.
    pub fn licenses_skip(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(()),
        }
    }
}

/// Typed view of a state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub action: String,
    pub status: Status,
    pub rc: i32,
    pub started_at: DateTime<FixedOffset>,
    pub finished_at: DateTime<FixedOffset>,
    pub user: String,
    pub host: String,
    pub log_path: String,
    pub version: String,
}

impl StateRecord {
    /// Convert record into a `key=value` document in canonical key order.
    pub fn to_document(&self) -> KvDocument {
        let mut document = KvDocument::new();
        document.set("action", &self.action);
        document.set("status", self.status.to_string());
        document.set("rc", self.rc.to_string());
        document.set("started_at", stamp(&self.started_at));
        document.set("finished_at", stamp(&self.finished_at));
        document.set("user", &self.user);
        document.set("host", &self.host);
        document.set("log_path", &self.log_path);
        document.set("version", &self.version);
        document
    }

    /// Build record from a `key=value` document.
    ///
    /// Identity fields (`user`, `host`, `log_path`, `version`) default to
    /// empty strings when absent. Everything else is required.
    ///
    /// # Errors
    ///
    /// - Return [`RecordError::MissingField`] if a required key is absent.
    /// - Return [`RecordError::InvalidField`] if a value cannot be parsed.
    pub fn from_document(document: &KvDocument) -> Result<Self, RecordError> {
        let required = |field: &'static str| {
            document
                .get(field)
                .ok_or(RecordError::MissingField { field })
        };
        let invalid = |field: &'static str, value: &str| RecordError::InvalidField {
            field,
            value: value.to_string(),
        };
        let optional = |field: &str| document.get(field).unwrap_or_default().to_string();

        let status = required("status")?;
        let rc = required("rc")?;
        let started_at = required("started_at")?;
        let finished_at = required("finished_at")?;

        Ok(Self {
            action: required("action")?.to_string(),
            status: status.parse().map_err(|_| invalid("status", status))?,
            rc: rc.parse().map_err(|_| invalid("rc", rc))?,
            started_at: DateTime::parse_from_rfc3339(started_at)
                .map_err(|_| invalid("started_at", started_at))?,
            finished_at: DateTime::parse_from_rfc3339(finished_at)
                .map_err(|_| invalid("finished_at", finished_at))?,
            user: optional("user"),
            host: optional("host"),
            log_path: optional("log_path"),
            version: optional("version"),
        })
    }
}

impl Display for StateRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.to_document())
    }
}

fn stamp(at: &DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Reader and writer of state records under a state root.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_root: PathBuf,
}

impl StateStore {
    /// Construct new state store.
    ///
    /// The state root is created lazily on first write.
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    /// Deterministic path of an action's state file.
    pub fn state_path(&self, action: impl AsRef<str>) -> PathBuf {
        self.state_root.join(format!("{}.state", action.as_ref()))
    }

    /// Read an action's state record.
    ///
    /// A missing state file is not an error: it means the action never ran,
    /// and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if the file exists but cannot be read.
    /// - Return [`StateError::Parse`] if the file is not valid `key=value`
    ///   text.
    /// - Return [`StateError::Record`] if the document lacks or garbles a
    ///   field.
    /// - Return [`StateError::Mismatch`] if the record names another action.
    #[instrument(skip(self, action), level = "debug")]
    pub fn read(&self, action: impl AsRef<str>) -> Result<Option<StateRecord>> {
        let action = action.as_ref();
        let path = self.state_path(action);
        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no state recorded for {action}");
                return Ok(None);
            }
            Err(source) => return Err(StateError::Read { source, path }),
        };

        let document: KvDocument = content.parse().map_err(|source| StateError::Parse {
            source,
            path: path.clone(),
        })?;
        let record = StateRecord::from_document(&document).map_err(|source| {
            StateError::Record {
                source,
                path: path.clone(),
            }
        })?;

        if record.action != action {
            return Err(StateError::Mismatch {
                expect: action.to_string(),
                found: record.action,
                path,
            });
        }

        Ok(Some(record))
    }

    /// Atomically replace an action's state record.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Write`] if the temporary file cannot be
    ///   written or renamed over the destination.
    pub fn write(&self, action: impl AsRef<str>, record: &StateRecord) -> Result<()> {
        self.stage(action, record)?.commit()
    }

    /// Write the temporary half of an atomic replacement.
    ///
    /// Nothing becomes visible at the destination until
    /// [`PendingWrite::commit`] is called. Dropping the pending write instead
    /// discards the temporary file.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Write`] if the state root or temporary file
    ///   cannot be created and filled.
    #[instrument(skip(self, action, record), level = "debug")]
    pub fn stage(&self, action: impl AsRef<str>, record: &StateRecord) -> Result<PendingWrite> {
        let destination = self.state_path(action);
        let write_error = |source: std::io::Error| StateError::Write {
            source,
            path: destination.clone(),
        };

        mkdirp(&self.state_root).map_err(write_error)?;
        let mut temp = NamedTempFile::new_in(&self.state_root).map_err(write_error)?;
        temp.write_all(record.to_string().as_bytes())
            .map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        debug!("staged state record at {:?}", temp.path().display());

        Ok(PendingWrite { temp, destination })
    }

    /// List every readable state record, sorted by action name.
    ///
    /// Unreadable or corrupt files are skipped. A missing state root yields
    /// an empty list.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if the state root exists but cannot be
    ///   listed.
    pub fn records(&self) -> Result<Vec<StateRecord>> {
        let entries = match read_dir(&self.state_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::Read {
                    source,
                    path: self.state_root.clone(),
                })
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("state") {
                continue;
            }

            let Some(action) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            match self.read(action) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => debug!("skip unreadable state file {:?}: {err}", path.display()),
            }
        }
        records.sort_by(|a, b| a.action.cmp(&b.action));

        Ok(records)
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }
}

/// Staged but not yet visible state record.
#[derive(Debug)]
pub struct PendingWrite {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl PendingWrite {
    /// Path of the temporary file holding the new record.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the temporary file over the destination.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Write`] if the rename fails.
    pub fn commit(self) -> Result<()> {
        let destination = self.destination;
        self.temp
            .persist(&destination)
            .map_err(|err| StateError::Write {
                source: err.error,
                path: destination.clone(),
            })?;

        Ok(())
    }
}

/// Field-level error types for state records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Required key is absent.
    #[error("missing field {field:?}")]
    MissingField { field: &'static str },

    /// Key is present, but its value cannot be parsed.
    #[error("invalid value {value:?} for field {field:?}")]
    InvalidField { field: &'static str, value: String },
}

/// State store error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// State file exists but cannot be read.
    #[error("failed to read state at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be written atomically.
    #[error("failed to write state at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file is not valid `key=value` text.
    #[error("malformed state file at {:?}", path.display())]
    Parse {
        #[source]
        source: KvError,
        path: PathBuf,
    },

    /// State file does not describe a complete record.
    #[error("incomplete state record at {:?}", path.display())]
    Record {
        #[source]
        source: RecordError,
        path: PathBuf,
    },

    /// State file belongs to another action.
    #[error("state at {:?} belongs to {found:?}, expected {expect:?}", path.display())]
    Mismatch {
        expect: String,
        found: String,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StateError> = std::result::Result<T, E>;
