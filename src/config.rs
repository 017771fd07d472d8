// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that provkit reads to find
//! its staged catalog, logs, and state records. Every path is configuration
//! rather than hardcoded policy, so a test can point an entire run at a
//! temporary directory.
//!
//! # General Layout
//!
//! ```toml
//! [layout]
//! target_root = "$HOME/.local/share/provkit"
//! logs_root = "$HOME/.local/share/provkit/logs"
//! state_root = "$HOME/.local/share/provkit/state"
//!
//! [clock]
//! timezone = "Europe/Paris"
//!
//! [stage]
//! register_path = true
//! profile = "~/.profile"
//! ```
//!
//! All sections and fields are optional. Missing paths fall back to the
//! defaults of [`crate::path`].

use crate::path::{default_profile, default_target_root, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{absolute, Path, PathBuf},
    str::FromStr,
};

/// Provkit settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Filesystem layout of the staged catalog and runtime records.
    pub layout: LayoutSettings,

    /// Timestamp rendering.
    pub clock: ClockSettings,

    /// Stager behaviour.
    pub stage: StageSettings,
}

impl Settings {
    /// Load settings from a configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        read_to_string(path)
            .map_err(|source| ConfigError::Read {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Load settings from the configuration file if it exists.
    ///
    /// A missing file yields the default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] if an existing file cannot be loaded.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve configured paths into a concrete [`Layout`].
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if a default path is needed but
    ///   the home directory cannot be determined.
    /// - Return [`ConfigError::ResolvePath`] if a relative path cannot be
    ///   made absolute.
    pub fn layout(&self) -> Result<Layout> {
        let target_root = match &self.layout.target_root {
            Some(path) => path.clone(),
            None => default_target_root()?,
        };
        let logs_root = self
            .layout
            .logs_root
            .clone()
            .unwrap_or_else(|| target_root.join("logs"));
        let state_root = self
            .layout
            .state_root
            .clone()
            .unwrap_or_else(|| target_root.join("state"));

        Ok(Layout {
            target_root: resolve(target_root)?,
            logs_root: resolve(logs_root)?,
            state_root: resolve(state_root)?,
        })
    }

    /// Resolve the shell profile that receives the staged `bin` directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if the default profile is needed
    ///   but the home directory cannot be determined.
    pub fn profile(&self) -> Result<PathBuf> {
        match &self.stage.profile {
            Some(path) => resolve(path.clone()),
            None => Ok(default_profile()?),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let layout = &mut settings.layout;
        for path in [
            &mut layout.target_root,
            &mut layout.logs_root,
            &mut layout.state_root,
            &mut settings.stage.profile,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand(path)?;
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configured filesystem locations.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Root that receives the staged `bin/` and `actions/` directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_root: Option<PathBuf>,

    /// Directory holding one log file per action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_root: Option<PathBuf>,

    /// Directory holding one state record per action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<PathBuf>,
}

/// Timestamp settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Timezone label prefixed to every log stamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Stager settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StageSettings {
    /// Add the staged `bin` directory to the user's command search path.
    pub register_path: bool,

    /// Shell profile to append the `PATH` entry to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<PathBuf>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            register_path: true,
            profile: None,
        }
    }
}

/// Resolved filesystem layout.
///
/// Threaded explicitly through the dispatcher, actions, and stager.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Layout {
    pub target_root: PathBuf,
    pub logs_root: PathBuf,
    pub state_root: PathBuf,
}

impl Layout {
    /// Construct layout with logs and state nested under the target root.
    pub fn under(target_root: impl Into<PathBuf>) -> Self {
        let target_root = target_root.into();
        Self {
            logs_root: target_root.join("logs"),
            state_root: target_root.join("state"),
            target_root,
        }
    }

    /// Directory of staged action executables.
    pub fn catalog_dir(&self) -> PathBuf {
        self.target_root.join("actions")
    }

    /// Directory of staged dispatcher entrypoints.
    pub fn bin_dir(&self) -> PathBuf {
        self.target_root.join("bin")
    }

    /// File holding the staged catalog's version tag.
    pub fn version_file(&self) -> PathBuf {
        self.target_root.join("VERSION")
    }
}

/// Make path absolute against the current directory.
fn resolve(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }

    absolute(&path).map_err(|source| ConfigError::ResolvePath { source, path })
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Relative path cannot be made absolute.
    #[error("failed to resolve {:?} to an absolute path", path.display())]
    ResolvePath {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default path needs a home directory that cannot be found.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            [layout]
            target_root = "$BLAH/provkit"
            state_root = "${BLAH}/state"

            [clock]
            timezone = "Europe/Paris"

            [stage]
            register_path = false
            profile = "$BLAH/.profile"
        "#
        .parse()?;

        let expect = Settings {
            layout: LayoutSettings {
                target_root: Some("/home/blah/provkit".into()),
                logs_root: None,
                state_root: Some("/home/blah/state".into()),
            },
            clock: ClockSettings {
                timezone: Some("Europe/Paris".into()),
            },
            stage: StageSettings {
                register_path: false,
                profile: Some("/home/blah/.profile".into()),
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_empty_settings_uses_defaults() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());
        assert!(result.stage.register_path);

        Ok(())
    }

    #[test]
    fn serialize_settings() {
        let result = Settings {
            layout: LayoutSettings {
                target_root: Some("/opt/provkit".into()),
                logs_root: Some("/var/log/provkit".into()),
                state_root: None,
            },
            clock: ClockSettings {
                timezone: Some("UTC".into()),
            },
            stage: StageSettings::default(),
        }
        .to_string();

        let expect = indoc! {r#"
            [layout]
            target_root = "/opt/provkit"
            logs_root = "/var/log/provkit"

            [clock]
            timezone = "UTC"

            [stage]
            register_path = true
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn layout_nests_missing_roots_under_target() -> anyhow::Result<()> {
        let settings: Settings = r#"
            [layout]
            target_root = "/opt/provkit"
            logs_root = "/var/log/provkit"
        "#
        .parse()?;

        let layout = settings.layout()?;
        assert_eq!(layout.target_root, PathBuf::from("/opt/provkit"));
        assert_eq!(layout.logs_root, PathBuf::from("/var/log/provkit"));
        assert_eq!(layout.state_root, PathBuf::from("/opt/provkit/state"));
        assert_eq!(layout.catalog_dir(), PathBuf::from("/opt/provkit/actions"));
        assert_eq!(layout.bin_dir(), PathBuf::from("/opt/provkit/bin"));

        Ok(())
    }

    #[test]
    fn layout_resolves_relative_roots_to_absolute() -> anyhow::Result<()> {
        let settings: Settings = r#"
            [layout]
            target_root = "rel/opt"
            logs_root = "rel/logs"

            [stage]
            profile = "rel/.profile"
        "#
        .parse()?;

        let cwd = std::env::current_dir()?;
        let layout = settings.layout()?;
        assert!(layout.target_root.is_absolute());
        assert_eq!(layout.target_root, cwd.join("rel/opt"));
        assert_eq!(layout.logs_root, cwd.join("rel/logs"));
        assert_eq!(layout.state_root, cwd.join("rel/opt/state"));
        assert_eq!(settings.profile()?, cwd.join("rel/.profile"));

        Ok(())
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let result = Settings::load("/definitely/not/here/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
