// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Catalog staging.
//!
//! The __stager__ installs the action catalog and the dispatcher from a
//! repository checkout into the fixed runtime layout. It runs once per
//! machine, and again after every update of the checkout. It is itself an
//! action named `stage-catalog`, so its outcome lands in a state record like
//! any other.
//!
//! # Checkout Layout
//!
//! ```text
//! <checkout>/
//! ├── actions/   # one executable per action, e.g., install-java.sh
//! ├── bin/       # optional wrapper entrypoints
//! └── VERSION    # optional version tag of the catalog
//! ```
//!
//! Hidden files and anything matched by a `.gitignore` are left behind.
//!
//! # Clean-Then-Copy
//!
//! Staging is not a plain idempotent merge. An action removed from the
//! checkout must disappear from `provkit list`, so by default the staged
//! `bin/` and `actions/` trees are rebuilt from scratch by
//! [`Stager::resync_catalog`]. The new trees are assembled next to the old
//! ones and swapped in afterwards, so a failed copy leaves the previous
//! catalog in place. [`StagePolicy::Merge`] overlays files instead, keeping
//! stale entries around.

use crate::{
    action::{ActionName, Provision, Result as ProvisionResult, Step},
    catalog::action_name_of,
    config::Layout,
    log::ActionLog,
};

use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use mkdirp::mkdirp;
use std::{
    fs::{canonicalize, copy, read_to_string, remove_dir_all, rename, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Name of the stager's own action.
pub const STAGE_ACTION: &str = "stage-catalog";

/// How staged content treats what is already there.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StagePolicy {
    /// Clear staged `bin/` and `actions/` before copying.
    #[default]
    Resync,

    /// Copy over existing staged content, keeping stale entries.
    Merge,
}

/// Summary of a completed staging run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub actions: Vec<ActionName>,
    pub entrypoints: usize,
    pub path_registered: bool,
}

/// Bootstrap action that installs the catalog.
#[derive(Debug, Clone)]
pub struct Stager {
    name: ActionName,
    source: PathBuf,
    layout: Layout,
    policy: StagePolicy,
    dispatcher_exe: Option<PathBuf>,
    profile: Option<PathBuf>,
}

impl Stager {
    /// Construct new stager from checkout into layout.
    pub fn new(source: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            name: ActionName::from_static(STAGE_ACTION),
            source: source.into(),
            layout,
            policy: StagePolicy::default(),
            dispatcher_exe: None,
            profile: None,
        }
    }

    /// Select how existing staged content is treated.
    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Also install this dispatcher executable into the staged `bin/`.
    pub fn with_dispatcher_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.dispatcher_exe = Some(path.into());
        self
    }

    /// Register the staged `bin/` in this shell profile.
    pub fn with_profile(mut self, profile: impl Into<PathBuf>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Stage checkout into the layout.
    ///
    /// # Errors
    ///
    /// - Return [`StageError::MissingSource`] if the checkout has no
    ///   `actions/` directory.
    /// - Return [`StageError::Walk`] if the checkout cannot be walked.
    /// - Return [`StageError::Io`] if any directory or file cannot be
    ///   created, copied, or swapped into place.
    #[instrument(skip(self, log), level = "debug")]
    pub fn stage(&self, log: &ActionLog) -> Result<StageReport> {
        let source_actions = self.source.join("actions");
        if !source_actions.is_dir() {
            return Err(StageError::MissingSource {
                path: source_actions,
            });
        }

        for dir in [
            &self.layout.target_root,
            &self.layout.logs_root,
            &self.layout.state_root,
        ] {
            ensure_dir(dir)?;
        }

        let mut actions = Vec::new();
        let mut action_files = Vec::new();
        for path in collect_files(&source_actions)? {
            match action_name_of(&path) {
                Some(name) => {
                    actions.push(name);
                    action_files.push(path);
                }
                None => log.warn(format!(
                    "skipping {:?}: not an action executable",
                    path.display()
                )),
            }
        }
        actions.sort();
        actions.dedup();

        let source_bin = self.source.join("bin");
        let mut entrypoints = if source_bin.is_dir() {
            collect_files(&source_bin)?
        } else {
            Vec::new()
        };
        if let Some(exe) = &self.dispatcher_exe {
            entrypoints.push(exe.clone());
        }

        let bar = progress_bar(action_files.len() + entrypoints.len())?;
        match self.policy {
            StagePolicy::Resync => self.resync_catalog(&action_files, &entrypoints, &bar)?,
            StagePolicy::Merge => self.merge_catalog(&action_files, &entrypoints, &bar)?,
        }
        bar.finish_and_clear();
        log.info(format!(
            "staged {} actions and {} entrypoints into {:?}",
            actions.len(),
            entrypoints.len(),
            self.layout.target_root.display()
        ));

        let version = self.source.join("VERSION");
        if version.is_file() {
            copy_file(&version, &self.layout.version_file())?;
        }

        let path_registered = match &self.profile {
            Some(profile) => match register_path(&self.layout.bin_dir(), profile) {
                Ok(added) => {
                    if added {
                        log.info(format!(
                            "added {:?} to PATH in {:?}",
                            self.layout.bin_dir().display(),
                            profile.display()
                        ));
                    }
                    added
                }
                Err(err) => {
                    log.warn(format!(
                        "could not add {:?} to PATH in {:?}: {err}",
                        self.layout.bin_dir().display(),
                        profile.display()
                    ));
                    false
                }
            },
            None => false,
        };

        Ok(StageReport {
            actions,
            entrypoints: entrypoints.len(),
            path_registered,
        })
    }

    /// Rebuild staged `bin/` and `actions/` from scratch.
    ///
    /// Fresh trees are assembled in a temporary directory inside the target
    /// root, then swapped in place of the old ones. Only the staged subtree
    /// is ever removed.
    ///
    /// # Errors
    ///
    /// - Return [`StageError::Io`] if staging or swapping fails.
    pub fn resync_catalog(
        &self,
        action_files: &[PathBuf],
        entrypoints: &[PathBuf],
        bar: &ProgressBar,
    ) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.layout.target_root)
            .map_err(|source| StageError::Io {
                source,
                path: self.layout.target_root.clone(),
            })?;

        let fresh_actions = staging.path().join("actions");
        let fresh_bin = staging.path().join("bin");
        copy_all(action_files, &fresh_actions, bar)?;
        copy_all(entrypoints, &fresh_bin, bar)?;

        swap_dir(&fresh_actions, &self.layout.catalog_dir())?;
        swap_dir(&fresh_bin, &self.layout.bin_dir())?;
        debug!("resynced catalog at {:?}", self.layout.catalog_dir().display());

        Ok(())
    }

    /// Overlay files onto the staged `bin/` and `actions/`.
    ///
    /// # Errors
    ///
    /// - Return [`StageError::Io`] if any copy fails.
    pub fn merge_catalog(
        &self,
        action_files: &[PathBuf],
        entrypoints: &[PathBuf],
        bar: &ProgressBar,
    ) -> Result<()> {
        copy_all(action_files, &self.layout.catalog_dir(), bar)?;
        copy_all(entrypoints, &self.layout.bin_dir(), bar)?;

        Ok(())
    }
}

impl Provision for Stager {
    fn name(&self) -> &ActionName {
        &self.name
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").into()
    }

    fn describe(&self) -> String {
        format!(
            "{STAGE_ACTION}: install the action catalog and dispatcher\n\n\
             prerequisites:\n  a checkout containing an actions/ directory\n\n\
             usage:\n  provkit stage [--source <checkout>] [--keep-existing]\n\n\
             installs:\n  {}\n  {}\n  {}",
            self.layout.catalog_dir().display(),
            self.layout.bin_dir().display(),
            self.layout.version_file().display(),
        )
    }

    fn provision(&self, step: &Step<'_>) -> ProvisionResult<()> {
        step.log.info(format!(
            "staging {:?} with policy {:?}",
            self.source.display(),
            self.policy
        ));
        self.stage(step.log)?;

        Ok(())
    }
}

/// Collect regular files directly inside a directory, sorted by name.
///
/// Hidden files and gitignored files are skipped.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .hidden(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        if entry.file_type().is_some_and(|kind| kind.is_file()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    let bar = ProgressBar::new(len as u64);
    bar.set_style(style);
    bar.set_message("staging catalog");

    Ok(bar)
}

fn copy_all(files: &[PathBuf], dest_dir: &Path, bar: &ProgressBar) -> Result<()> {
    ensure_dir(dest_dir)?;
    for file in files {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        copy_file(file, &dest_dir.join(file_name))?;
        bar.inc(1);
    }

    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    // INVARIANT: Never copy a file onto itself, that would truncate it.
    if let (Ok(a), Ok(b)) = (canonicalize(from), canonicalize(to)) {
        if a == b {
            debug!("skip copying {:?} onto itself", from.display());
            return Ok(());
        }
    }

    copy(from, to).map_err(|source| StageError::Io {
        source,
        path: to.to_path_buf(),
    })?;

    Ok(())
}

fn swap_dir(fresh: &Path, staged: &Path) -> Result<()> {
    let io_error = |source: std::io::Error| StageError::Io {
        source,
        path: staged.to_path_buf(),
    };

    match remove_dir_all(staged) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_error(err)),
    }
    rename(fresh, staged).map_err(io_error)
}

fn ensure_dir(path: &Path) -> Result<()> {
    mkdirp(path).map_err(|source| StageError::Io {
        source,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Append the staged `bin/` to `PATH` in a shell profile.
///
/// Returns `false` if the profile already mentions the directory.
fn register_path(bin: &Path, profile: &Path) -> std::io::Result<bool> {
    if cfg!(windows) {
        return Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "persistent PATH registration is only supported through shell profiles",
        ));
    }

    let bin = bin.to_string_lossy();
    let existing = match read_to_string(profile) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };
    if existing.lines().any(|line| line.contains(bin.as_ref())) {
        return Ok(false);
    }

    if let Some(parent) = profile.parent() {
        mkdirp(parent)?;
    }
    let separator = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    let mut file = OpenOptions::new().create(true).append(true).open(profile)?;
    file.write_all(
        format!("{separator}# added by provkit stage\nexport PATH=\"{bin}:$PATH\"\n").as_bytes(),
    )?;

    Ok(true)
}

/// Staging error types.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Checkout has no actions directory.
    #[error("no action catalog in checkout at {:?}", path.display())]
    MissingSource { path: PathBuf },

    /// Filesystem operation on the staged layout fails.
    #[error("failed to stage {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Checkout cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = StageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::{Action, Context, Identity, Tracked},
        catalog::Catalog,
        clock::Clock,
        log::LogSink,
        state::Status,
    };
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_dir, read_to_string, remove_file, write};

    fn checkout(dir: &Path, actions: &[&str]) -> PathBuf {
        let root = dir.join("checkout");
        create_dir_all(root.join("actions")).unwrap();
        for action in actions {
            write(root.join("actions").join(action), "#!/bin/sh\nexit 0\n").unwrap();
        }
        root
    }

    fn listed(layout: &Layout) -> Vec<String> {
        Catalog::open(layout.catalog_dir())
            .unwrap()
            .list(None)
            .unwrap()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn log(layout: &Layout) -> ActionLog {
        LogSink::new(&layout.logs_root, Clock::default()).for_action(STAGE_ACTION)
    }

    #[test]
    fn stage_creates_layout_and_copies_actions() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(
            dir.path(),
            &[
                "install-java.sh",
                "install-java.sh~",
                "install-node.sh",
                "new-rust-project",
                ".hidden.sh",
                "bad name.sh",
            ],
        );
        write(source.join("VERSION"), "2024.05\n")?;
        let layout = Layout::under(dir.path().join("opt"));

        let report = Stager::new(&source, layout.clone()).stage(&log(&layout))?;

        assert_eq!(
            report.actions.iter().map(ActionName::as_str).collect::<Vec<_>>(),
            vec!["install-java", "install-node", "new-rust-project"]
        );
        assert_eq!(listed(&layout), vec!["install-java", "install-node", "new-rust-project"]);
        assert!(!layout.catalog_dir().join(".hidden.sh").exists());
        assert!(!layout.catalog_dir().join("bad name.sh").exists());
        assert!(!layout.catalog_dir().join("install-java.sh~").exists());
        let content = read_to_string(log(&layout).path())?;
        assert!(content.contains("install-java.sh~\": not an action executable"));
        assert!(layout.bin_dir().is_dir());
        assert!(layout.logs_root.is_dir());
        assert!(layout.state_root.is_dir());
        assert_eq!(read_to_string(layout.version_file())?, "2024.05\n");

        Ok(())
    }

    #[test]
    fn stage_honors_gitignore() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["install-java.sh", "install-java.sh~"]);
        write(source.join("actions").join(".gitignore"), "*~\n")?;
        let layout = Layout::under(dir.path().join("opt"));

        Stager::new(&source, layout.clone()).stage(&log(&layout))?;

        let staged: Vec<_> = read_dir(layout.catalog_dir())?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(staged, vec![std::ffi::OsString::from("install-java.sh")]);

        Ok(())
    }

    #[test]
    fn restage_removes_stale_actions() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh", "b.sh"]);
        let layout = Layout::under(dir.path().join("opt"));
        let stager = Stager::new(&source, layout.clone());

        stager.stage(&log(&layout))?;
        assert_eq!(listed(&layout), vec!["a", "b"]);

        remove_file(source.join("actions").join("b.sh"))?;
        stager.stage(&log(&layout))?;
        assert_eq!(listed(&layout), vec!["a"]);

        let leftovers: Vec<_> = read_dir(&layout.target_root)?
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty());

        Ok(())
    }

    #[test]
    fn merge_policy_keeps_stale_actions() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh", "b.sh"]);
        let layout = Layout::under(dir.path().join("opt"));

        Stager::new(&source, layout.clone()).stage(&log(&layout))?;
        remove_file(source.join("actions").join("b.sh"))?;
        Stager::new(&source, layout.clone())
            .with_policy(StagePolicy::Merge)
            .stage(&log(&layout))?;

        assert_eq!(listed(&layout), vec!["a", "b"]);

        Ok(())
    }

    #[test]
    fn stage_installs_entrypoints_and_dispatcher() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh"]);
        create_dir_all(source.join("bin"))?;
        write(source.join("bin").join("chrome-wrapper"), "#!/bin/sh\n")?;
        let exe = dir.path().join("provkit");
        write(&exe, "binary")?;
        let layout = Layout::under(dir.path().join("opt"));

        let report = Stager::new(&source, layout.clone())
            .with_dispatcher_exe(&exe)
            .stage(&log(&layout))?;

        assert_eq!(report.entrypoints, 2);
        assert!(layout.bin_dir().join("chrome-wrapper").is_file());
        assert_eq!(read_to_string(layout.bin_dir().join("provkit"))?, "binary");

        Ok(())
    }

    #[test]
    fn merge_never_truncates_running_dispatcher() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh"]);
        let layout = Layout::under(dir.path().join("opt"));
        create_dir_all(layout.bin_dir())?;
        let exe = layout.bin_dir().join("provkit");
        write(&exe, "binary")?;

        Stager::new(&source, layout.clone())
            .with_policy(StagePolicy::Merge)
            .with_dispatcher_exe(&exe)
            .stage(&log(&layout))?;

        assert_eq!(read_to_string(&exe)?, "binary");

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn register_path_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh"]);
        let layout = Layout::under(dir.path().join("opt"));
        let profile = dir.path().join("home").join(".profile");
        write_parent(&profile, "alias ll='ls -l'")?;
        let stager = Stager::new(&source, layout.clone()).with_profile(&profile);

        assert!(stager.stage(&log(&layout))?.path_registered);
        assert!(!stager.stage(&log(&layout))?.path_registered);

        let content = read_to_string(&profile)?;
        let expect = format!("export PATH=\"{}:$PATH\"", layout.bin_dir().display());
        assert!(content.starts_with("alias ll='ls -l'\n# added by provkit stage\n"));
        assert_eq!(content.matches(&expect).count(), 1);

        Ok(())
    }

    #[test]
    fn unwritable_profile_is_only_a_warning() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh"]);
        let layout = Layout::under(dir.path().join("opt"));
        let blocker = dir.path().join("blocker");
        write(&blocker, "")?;

        let report = Stager::new(&source, layout.clone())
            .with_profile(blocker.join(".profile"))
            .stage(&log(&layout))?;

        assert!(!report.path_registered);
        let content = read_to_string(log(&layout).path())?;
        assert!(content.contains("Warning could not add"));

        Ok(())
    }

    #[test]
    fn missing_source_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = Layout::under(dir.path().join("opt"));

        let result = Stager::new(dir.path().join("nowhere"), layout.clone()).stage(&log(&layout));

        assert!(matches!(result, Err(StageError::MissingSource { .. })));
        assert!(!layout.target_root.exists());

        Ok(())
    }

    #[test]
    fn tracked_stager_records_its_own_state() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = checkout(dir.path(), &["a.sh"]);
        let layout = Layout::under(dir.path().join("opt"));
        let ctx = Context::with_identity(layout.clone(), Clock::default(), Identity::new("ops", "box"));

        let rc = Tracked::new(Stager::new(&source, layout.clone()), &ctx).run(&[], true);
        assert_eq!(rc, 0);
        let record = ctx.states().read(STAGE_ACTION)?.expect("state written");
        assert_eq!(record.status, Status::Success);
        assert_eq!(record.version, env!("CARGO_PKG_VERSION"));

        let rc = Tracked::new(Stager::new(dir.path().join("nowhere"), layout), &ctx).run(&[], true);
        assert_eq!(rc, 1);
        let record = ctx.states().read(STAGE_ACTION)?.expect("state written");
        assert_eq!(record.status, Status::Failed);

        Ok(())
    }

    fn write_parent(path: &Path, content: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(path, content)
    }
}
