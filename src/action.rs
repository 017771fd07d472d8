// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Action lifecycle.
//!
//! An __action__ is a named unit of provisioning work: install a toolchain,
//! scaffold a project, validate an environment. What the work actually does
//! is opaque to provkit. What provkit does own is the __lifecycle__ wrapped
//! around that work, which makes re-running any action safe and cheap.
//!
//! # Lifecycle
//!
//! ```text
//! START -> CHECK_PRIOR -> SKIPPED
//!                      -> RUNNING -> SUCCESS | FAILED
//!       -> END
//! ```
//!
//! 1. __START__: note the start time, log `Starting <action> (force=<bool>)`.
//! 2. __CHECK_PRIOR__: without force, read the prior state record. A record
//!    with `status=success` short-circuits into SKIPPED, which records
//!    `status=skipped, rc=0` and does no work at all. A failed, missing, or
//!    unreadable record never skips.
//! 3. __RUNNING__: perform the provisioning work.
//! 4. __SUCCESS__ records `rc=0`. __FAILED__ logs the error and records the
//!    failing tool's exit code, or 1 when there is none.
//! 5. __END__: the final record is always written, even on failure.
//!
//! # Seams
//!
//! The dispatcher only sees [`Action`]. The work itself implements
//! [`Provision`], and [`Tracked`] applies the lifecycle to it. Catalog
//! scripts are one kind of provision ([`script::ScriptProvision`]). The
//! stager is another, implemented natively.

pub mod script;

use crate::{
    clock::Clock,
    config::Layout,
    log::{ActionLog, LogSink},
    state::{StateRecord, StateStore, Status},
};

use chrono::{DateTime, Local};
use std::{
    env,
    error::Error as StdError,
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::PathBuf,
    str::FromStr,
};
use tracing::{error, instrument};

/// Flag that disables skip-on-success.
pub const FORCE_FLAG: &str = "--force";

/// Separator after which arguments are never read as provkit options.
pub const OPTIONS_END: &str = "--";

/// Validated action name.
///
/// # Invariant
///
/// - Matches `^[A-Za-z0-9_-]+$`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionName(String);

impl ActionName {
    /// Construct new action name.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidActionName`] if the name is empty or contains
    ///   characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidActionName> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if valid {
            Ok(Self(name))
        } else {
            Err(InvalidActionName(name))
        }
    }

    /// Construct action name from a literal known to be valid.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok());
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ActionName {
    type Err = InvalidActionName;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::new(data)
    }
}

impl Display for ActionName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

impl AsRef<str> for ActionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Action name contains forbidden characters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid action name {0:?}: expected letters, digits, '_' or '-'")]
pub struct InvalidActionName(pub String);

/// Operator and machine that ran an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub host: String,
}

impl Identity {
    /// Construct new identity.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// Detect identity from the environment.
    ///
    /// Falls back to `unknown` for anything that cannot be determined.
    pub fn detect() -> Self {
        let user = first_env(&["USER", "USERNAME", "LOGNAME"]);
        let host = first_env(&["HOSTNAME", "COMPUTERNAME"]).or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty())
        });

        Self {
            user: user.unwrap_or_else(|| "unknown".into()),
            host: host.unwrap_or_else(|| "unknown".into()),
        }
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Everything an action needs from its surroundings.
///
/// Built once per invocation from the resolved [`Layout`], and passed
/// explicitly to every action.
#[derive(Debug, Clone)]
pub struct Context {
    layout: Layout,
    clock: Clock,
    logs: LogSink,
    states: StateStore,
    identity: Identity,
}

impl Context {
    /// Construct new context, detecting operator identity from the
    /// environment.
    pub fn new(layout: Layout, clock: Clock) -> Self {
        Self::with_identity(layout, clock, Identity::detect())
    }

    /// Construct new context with explicit operator identity.
    pub fn with_identity(layout: Layout, clock: Clock, identity: Identity) -> Self {
        Self {
            logs: LogSink::new(&layout.logs_root, clock.clone()),
            states: StateStore::new(&layout.state_root),
            layout,
            clock,
            identity,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn logs(&self) -> &LogSink {
        &self.logs
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Invocable unit of work as the dispatcher sees it.
pub trait Action {
    /// Name of the action.
    fn name(&self) -> &ActionName;

    /// Run the action, returning its process exit code.
    fn run(&self, args: &[OsString], force: bool) -> i32;
}

/// Opaque provisioning work.
pub trait Provision {
    /// Name of the action this work belongs to.
    fn name(&self) -> &ActionName;

    /// Free-form version tag stored in the state record.
    fn version(&self) -> String;

    /// Structured description shown by `--help`.
    fn describe(&self) -> String;

    /// Show help without any side effects.
    ///
    /// Never performs any provisioning work.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError`] if help cannot be shown.
    fn help(&self, _args: &[OsString]) -> Result<i32> {
        println!("{}", self.describe());
        Ok(0)
    }

    /// Perform the provisioning work.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError`] if any step of the work fails.
    fn provision(&self, step: &Step<'_>) -> Result<()>;
}

/// Per-run handle given to provisioning work.
#[derive(Debug)]
pub struct Step<'a> {
    pub log: &'a ActionLog,
    pub args: &'a [OsString],
    pub force: bool,
}

/// Provisioning work wrapped in the action lifecycle.
#[derive(Debug)]
pub struct Tracked<'a, P>
where
    P: Provision,
{
    provision: P,
    ctx: &'a Context,
}

impl<'a, P> Tracked<'a, P>
where
    P: Provision,
{
    /// Construct new tracked action.
    pub fn new(provision: P, ctx: &'a Context) -> Self {
        Self { provision, ctx }
    }

    /// Read the prior record, treating anything unreadable as never run.
    fn prior(&self, log: &ActionLog) -> Option<StateRecord> {
        match self.ctx.states.read(self.provision.name()) {
            Ok(record) => record,
            Err(err) => {
                log.warn(format!(
                    "ignoring unreadable state for {}: {}",
                    self.provision.name(),
                    error_chain(&err)
                ));
                None
            }
        }
    }

    fn finish(
        &self,
        log: &ActionLog,
        started_at: DateTime<Local>,
        status: Status,
        rc: i32,
    ) -> i32 {
        let name = self.provision.name();
        let record = StateRecord {
            action: name.to_string(),
            status,
            rc,
            started_at: started_at.fixed_offset(),
            finished_at: self.ctx.clock.now().fixed_offset(),
            user: self.ctx.identity.user.clone(),
            host: self.ctx.identity.host.clone(),
            log_path: log.path().to_string_lossy().into_owned(),
            version: self.provision.version(),
        };

        if let Err(err) = self.ctx.states.write(name, &record) {
            log.error(format!("failed to record state for {name}: {}", error_chain(&err)));
        }
        log.info(format!("Finished {name}: status={status} rc={rc}"));

        rc
    }
}

impl<P> Action for Tracked<'_, P>
where
    P: Provision,
{
    fn name(&self) -> &ActionName {
        self.provision.name()
    }

    #[instrument(skip(self, args), fields(action = %self.provision.name()), level = "debug")]
    fn run(&self, args: &[OsString], force: bool) -> i32 {
        let name = self.provision.name();

        // INVARIANT: Help never touches state or logs.
        if wants_help(args) {
            return match self.provision.help(args) {
                Ok(code) => code,
                Err(err) => {
                    error!("{}", error_chain(&err));
                    err.exit_code()
                }
            };
        }

        let log = self.ctx.logs.for_action(name.as_str());
        let started_at = self.ctx.clock.now();
        log.info(format!("Starting {name} (force={force})"));

        if !force {
            if let Some(prior) = self.prior(&log) {
                if prior.status.licenses_skip() {
                    log.info(format!(
                        "Skipping {name}: already succeeded at {}",
                        prior.finished_at
                    ));
                    return self.finish(&log, started_at, Status::Skipped, 0);
                }
                log.debug(format!("prior run of {name} ended with status={}", prior.status));
            }
        }

        let step = Step {
            log: &log,
            args,
            force,
        };
        let (status, rc) = match self.provision.provision(&step) {
            Ok(()) => (Status::Success, 0),
            Err(err) => {
                log.error(format!("{name} failed: {}", error_chain(&err)));
                (Status::Failed, err.exit_code())
            }
        };

        self.finish(&log, started_at, status, rc)
    }
}

/// Arguments before the first `--` separator.
///
/// Everything after the separator belongs to the action itself.
pub fn options(args: &[OsString]) -> &[OsString] {
    let end = args
        .iter()
        .position(|arg| arg == OPTIONS_END)
        .unwrap_or(args.len());
    &args[..end]
}

/// Check if forwarded arguments ask for help.
pub fn wants_help(args: &[OsString]) -> bool {
    options(args).iter().any(|arg| arg == "--help" || arg == "-h")
}

/// Check if forwarded arguments already carry the force flag.
pub fn has_force(args: &[OsString]) -> bool {
    options(args).iter().any(|arg| arg == FORCE_FLAG)
}

/// Render an error with all of its sources on one line.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// External tool finished with a nonzero exit code.
    #[error("{:?} exited with code {code}", program.display())]
    Exit { program: PathBuf, code: i32 },

    /// External tool could not be launched at all.
    #[error("failed to launch {:?}", program.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        program: PathBuf,
    },

    /// Staging the catalog failed.
    #[error(transparent)]
    Stage(#[from] crate::stage::StageError),

    /// Generic I/O failure during the work.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Process exit code that represents this failure.
    ///
    /// Mirrors shell conventions: 127 when the program does not exist, 126
    /// when it cannot be executed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } if *code != 0 => *code,
            Self::Spawn { source, .. } => match source.kind() {
                ErrorKind::NotFound => 127,
                ErrorKind::PermissionDenied => 126,
                _ => 1,
            },
            _ => 1,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
