// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dispatcher.
//!
//! Resolve an action name to its catalog entry, run it through the action
//! lifecycle, and hand back its exit code untouched. The dispatcher never
//! touches state records itself. It only reads the catalog and writes one
//! line per run to its own log.

use crate::{
    action::{
        has_force, options, script::ScriptProvision, Action, ActionName, Context, InvalidActionName,
        Tracked, FORCE_FLAG,
    },
    catalog::{Catalog, CatalogError},
    log::Level,
};

use glob::Pattern;
use std::{ffi::OsString, fs::read_to_string};
use tracing::instrument;

/// Version tag reported when the catalog carries no `VERSION` file.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Resolve and run catalog actions.
#[derive(Debug)]
pub struct Dispatcher<'a> {
    ctx: &'a Context,
}

impl<'a> Dispatcher<'a> {
    /// Construct new dispatcher.
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Open the staged catalog.
    ///
    /// # Errors
    ///
    /// - Return [`DispatchError::Catalog`] if the catalog is not staged.
    pub fn catalog(&self) -> Result<Catalog> {
        Ok(Catalog::open(self.ctx.layout().catalog_dir())?)
    }

    /// List available action names, sorted.
    ///
    /// # Errors
    ///
    /// - Return [`DispatchError::Catalog`] if the catalog is not staged or
    ///   cannot be read.
    pub fn list(&self, pattern: Option<&Pattern>) -> Result<Vec<ActionName>> {
        Ok(self.catalog()?.list(pattern)?)
    }

    /// Check whether a name refers to a staged action.
    pub fn is_known(&self, name: &str) -> bool {
        let Ok(name) = ActionName::new(name) else {
            return false;
        };

        self.catalog()
            .and_then(|catalog| catalog.resolve(&name).map_err(DispatchError::from))
            .is_ok_and(|entry| entry.is_some())
    }

    /// Run an action and return its exit code verbatim.
    ///
    /// The force flag is forwarded to the action as `--force` unless the
    /// arguments already carry it. Passing `--force` among the arguments
    /// counts as asking for force.
    ///
    /// # Errors
    ///
    /// - Return [`DispatchError::InvalidName`] if the name is malformed.
    /// - Return [`DispatchError::Catalog`] if the catalog is not staged.
    /// - Return [`DispatchError::UnknownAction`] if no catalog entry exists.
    #[instrument(skip(self, args), level = "debug")]
    pub fn run(&self, name: &str, args: &[OsString], force: bool) -> Result<i32> {
        let name = ActionName::new(name)?;
        let entry = self
            .catalog()?
            .resolve(&name)?
            .ok_or_else(|| DispatchError::UnknownAction(name.to_string()))?;

        let force = force || has_force(args);
        let args = forward_args(args, force);
        let provision = ScriptProvision::new(entry.name, entry.path, self.version());
        let rc = Tracked::new(provision, self.ctx).run(&args, force);

        self.ctx.logs().append_dispatcher(
            Level::Info,
            format!("run {name} args={args:?} force={force} -> rc={rc}"),
        );

        Ok(rc)
    }

    /// Version tag of the staged catalog.
    pub fn version(&self) -> String {
        read_to_string(self.ctx.layout().version_file())
            .ok()
            .map(|version| version.trim().to_string())
            .filter(|version| !version.is_empty())
            .unwrap_or_else(|| UNKNOWN_VERSION.into())
    }
}

/// Add the force flag unless it is unwanted or already present.
///
/// The flag goes in front of any `--` separator, so the action still sees
/// it as an option.
pub fn forward_args(args: &[OsString], force: bool) -> Vec<OsString> {
    let mut forwarded = args.to_vec();
    if force && !has_force(args) {
        forwarded.insert(options(args).len(), FORCE_FLAG.into());
    }

    forwarded
}

/// Dispatcher error types.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Catalog is absent or unreadable.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Requested name is not a valid action name.
    #[error(transparent)]
    InvalidName(#[from] InvalidActionName),

    /// No catalog entry exists for the requested name.
    #[error("unknown action {0:?}")]
    UnknownAction(String),
}

impl DispatchError {
    /// Whether usage text helps the operator recover.
    pub fn wants_usage(&self) -> bool {
        matches!(self, Self::UnknownAction(_) | Self::InvalidName(_))
    }
}

/// Friendly result alias :3
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
