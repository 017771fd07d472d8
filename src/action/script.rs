// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Catalog scripts as provisioning work.
//!
//! Each staged catalog file is an executable: a shell script on Linux, a
//! PowerShell or batch script on Windows, or a native binary on either. The
//! script gets the forwarded arguments and the operator's terminal, and
//! provkit waits for it to exit.

use crate::action::{ActionName, Provision, ProvisionError, Result, Step};

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument};

/// Provisioning work backed by a catalog executable.
#[derive(Debug, Clone)]
pub struct ScriptProvision {
    name: ActionName,
    path: PathBuf,
    version: String,
}

impl ScriptProvision {
    /// Construct new script provision.
    pub fn new(name: ActionName, path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            name,
            path: path.into(),
            version: version.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Provision for ScriptProvision {
    fn name(&self) -> &ActionName {
        &self.name
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn describe(&self) -> String {
        format!(
            "{}\n\n  catalog entry: {}\n  usage: provkit {} [--force] [--help] [-- <action-args>...]",
            self.name,
            self.path.display(),
            self.name
        )
    }

    fn provision(&self, step: &Step<'_>) -> Result<()> {
        step.log.debug(format!(
            "exec {:?} with {:?}",
            self.path.display(),
            step.args
        ));

        let code = syscall_interactive(&self.path, step.args)?;
        if code != 0 {
            return Err(ProvisionError::Exit {
                program: self.path.clone(),
                code,
            });
        }

        Ok(())
    }
}

/// Build the command that runs a catalog file.
///
/// Script extensions pick their interpreter, anything else is executed
/// directly.
fn command_for(path: &Path) -> Command {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("sh") => with_script("sh", &[], path),
        Some("bash") => with_script("bash", &[], path),
        Some("ps1") => with_script(
            if cfg!(windows) { "powershell" } else { "pwsh" },
            &["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"],
            path,
        ),
        Some("cmd") | Some("bat") => with_script("cmd", &["/C"], path),
        _ => Command::new(path),
    }
}

fn with_script(interpreter: &str, flags: &[&str], path: &Path) -> Command {
    let mut command = Command::new(interpreter);
    command.args(flags).arg(path);
    command
}

/// Run catalog file on the operator's terminal and wait for it.
#[instrument(skip(path, args), level = "debug")]
fn syscall_interactive(
    path: &Path,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<i32> {
    let status = command_for(path)
        .args(args)
        .spawn()
        .and_then(|mut child| child.wait())
        .map_err(|source| ProvisionError::Spawn {
            source,
            program: path.to_path_buf(),
        })?;
    let code = exit_code(status);
    debug!("{:?} exited with {code}", path.display());

    Ok(code)
}

/// Map child exit status to a shell-style exit code.
///
/// On unix a child killed by a signal reports `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        action::{Action, Context, Identity, Tracked},
        clock::Clock,
        config::Layout,
        state::Status,
    };
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{
        ffi::OsString,
        fs::{read_to_string, write},
    };

    fn context(dir: &Path) -> Context {
        Context::with_identity(
            Layout::under(dir),
            Clock::new(Some("UTC".into())),
            Identity::new("ops", "ai-box"),
        )
    }

    fn script(dir: &Path, name: &str, body: &str) -> ScriptProvision {
        let path = dir.join(format!("{name}.sh"));
        write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        ScriptProvision::new(ActionName::new(name).unwrap(), path, "test")
    }

    #[test_case(0; "success")]
    #[test_case(1; "failure")]
    #[test_case(2; "misuse")]
    #[test_case(127; "not found")]
    #[test]
    fn script_exit_code_passes_through(code: i32) -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context(dir.path());
        let provision = script(dir.path(), "stub", &format!("exit {code}"));

        let rc = Tracked::new(provision, &ctx).run(&[], false);

        pretty_assertions::assert_eq!(rc, code);
        let record = ctx.states().read("stub")?.expect("state written");
        pretty_assertions::assert_eq!(record.rc, code);
        let expect = if code == 0 {
            Status::Success
        } else {
            Status::Failed
        };
        pretty_assertions::assert_eq!(record.status, expect);

        Ok(())
    }

    #[test]
    fn script_receives_forwarded_args() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context(dir.path());
        let marker = dir.path().join("marker");
        let provision = script(
            dir.path(),
            "echo-args",
            &format!("echo \"$@\" > {:?}", marker.display()),
        );

        let args: Vec<OsString> = vec!["--force".into(), "jdk-21".into()];
        let rc = Tracked::new(provision, &ctx).run(&args, true);

        assert_eq!(rc, 0);
        assert_eq!(read_to_string(&marker)?, "--force jdk-21\n");

        Ok(())
    }

    #[test]
    fn help_never_executes_script() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context(dir.path());
        let marker = dir.path().join("marker");
        let provision = script(
            dir.path(),
            "install-x",
            &format!("echo installed >> {:?}", marker.display()),
        );

        let rc = Tracked::new(provision, &ctx).run(&["--help".into()], false);

        assert_eq!(rc, 0);
        assert!(!marker.exists());
        assert!(!ctx.states().state_path("install-x").exists());

        Ok(())
    }

    #[test]
    fn missing_interpreter_target_reports_spawn_failure() {
        let provision = ScriptProvision::new(
            ActionName::new("ghost").unwrap(),
            "/definitely/not/here/ghost",
            "test",
        );
        let result = syscall_interactive(provision.path(), Vec::<OsString>::new());

        assert!(matches!(
            result,
            Err(ProvisionError::Spawn { ref source, .. }) if source.kind() == std::io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn signal_death_maps_above_128() -> anyhow::Result<()> {
        let status = Command::new("sh").args(["-c", "kill -9 $$"]).status()?;
        assert_eq!(exit_code(status), 137);

        Ok(())
    }
}
