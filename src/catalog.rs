// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Catalog of staged actions.
//!
//! The __catalog__ is a flat directory of action executables. The file stem
//! of each entry is the action's name, so `install-java.sh` provides the
//! action `install-java`. Hidden files, directories, and files whose stem is
//! not a valid [`ActionName`] are not part of the catalog.
//!
//! The same catalog may carry several variants of one action, e.g.,
//! `install-java.sh` for Linux and `install-java.ps1` for Windows. They list
//! once, and resolution prefers the variant native to the current platform.

use crate::action::ActionName;

use glob::Pattern;
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fs::read_dir,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Extension preference for resolution, most preferred first.
#[cfg(windows)]
const PREFERRED_EXTENSIONS: &[&str] = &["exe", "ps1", "cmd", "bat", "", "sh", "bash"];

/// Extension preference for resolution, most preferred first.
#[cfg(not(windows))]
const PREFERRED_EXTENSIONS: &[&str] = &["", "sh", "bash", "exe", "ps1", "cmd", "bat"];

/// One resolved catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: ActionName,
    pub path: PathBuf,
}

/// Read-only view over the staged catalog directory.
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
}

impl Catalog {
    /// Open catalog directory.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Missing`] if the catalog has not been staged.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CatalogError::Missing { dir });
        }

        Ok(Self { dir })
    }

    /// List action names in sorted order.
    ///
    /// Optionally keep only the names that match a glob pattern.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Read`] if the catalog cannot be listed.
    pub fn list(&self, pattern: Option<&Pattern>) -> Result<Vec<ActionName>> {
        Ok(self
            .entries()?
            .into_keys()
            .filter(|name| pattern.is_none_or(|pattern| pattern.matches(name.as_str())))
            .collect())
    }

    /// Resolve action name to its catalog entry.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Read`] if the catalog cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve(&self, name: &ActionName) -> Result<Option<CatalogEntry>> {
        let entry = self.entries()?.remove(name).and_then(|mut candidates| {
            candidates.sort_by_key(|path| preference(path));
            candidates.into_iter().next()
        });
        debug!("resolved {name} to {entry:?}");

        Ok(entry.map(|path| CatalogEntry {
            name: name.clone(),
            path,
        }))
    }

    /// Group catalog files by action name.
    fn entries(&self) -> Result<BTreeMap<ActionName, Vec<PathBuf>>> {
        let read_error = |source: std::io::Error| CatalogError::Read {
            source,
            dir: self.dir.clone(),
        };

        let mut entries: BTreeMap<ActionName, Vec<PathBuf>> = BTreeMap::new();
        for entry in read_dir(&self.dir).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            match action_name_of(&path) {
                Some(name) => entries.entry(name).or_default().push(path),
                None => debug!("skip non-action catalog file {:?}", path.display()),
            }
        }

        Ok(entries)
    }
}

/// Derive action name from a catalog file path.
///
/// Returns `None` for hidden files, for extensions that are not executable
/// on any platform (e.g., editor backups like `install-java.sh~`), and for
/// stems that are not valid names.
pub fn action_name_of(path: &Path) -> Option<ActionName> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }

    if !PREFERRED_EXTENSIONS.contains(&extension_of(path).as_str()) {
        return None;
    }

    let stem = path.file_stem()?.to_str()?;
    ActionName::new(stem).ok()
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn preference(path: &Path) -> usize {
    let extension = extension_of(path);

    PREFERRED_EXTENSIONS
        .iter()
        .position(|preferred| *preferred == extension)
        .unwrap_or(PREFERRED_EXTENSIONS.len())
}

/// Catalog error types.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Catalog directory does not exist.
    #[error("action catalog not found at {:?}, run 'provkit stage' first", dir.display())]
    Missing { dir: PathBuf },

    /// Catalog directory cannot be listed.
    #[error("failed to read action catalog at {:?}", dir.display())]
    Read {
        #[source]
        source: std::io::Error,
        dir: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
