// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A thin client for VirtualBox's `VBoxManage` command-line tool.

use std::process::{Command, Stdio};

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::util::{
    display_command, run_command_check_status, run_command_inherit_output,
};

/// The label `VBoxManage list systemproperties` puts in front of the default
/// machine folder.
const DEFAULT_MACHINE_FOLDER_LABEL: &str = "Default machine folder:";

/// What to do with a management command's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Echo {
    /// Capture stdout and return it to the caller.
    Capture,

    /// Let the command write to the terminal. Nothing is returned.
    Inherit,
}

/// Implemented by objects that can carry out hypervisor management operations.
pub trait Hypervisor {
    /// Runs the management `operation` with `args`, returning its stdout if
    /// `echo` is `Echo::Capture`.
    fn run(&self, operation: &str, args: &[String], echo: Echo)
        -> Result<String>;

    /// Starts the hypervisor's front end for the VM described by `descriptor`
    /// without waiting for it to exit.
    fn launch(&self, descriptor: &Utf8Path) -> Result<()>;

    /// Returns the hypervisor's default machine folder, if it will report one
    /// and that folder exists. Never fails.
    fn default_machine_folder(&self) -> Option<Utf8PathBuf> {
        let output = self
            .run("list", &["systemproperties".to_string()], Echo::Capture)
            .ok()?;

        let folder = Utf8PathBuf::from(parse_default_machine_folder(&output)?);
        folder.is_dir().then_some(folder)
    }
}

/// Extracts the default machine folder from the output of `VBoxManage list
/// systemproperties`.
pub fn parse_default_machine_folder(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let value = line
            .trim_start()
            .strip_prefix(DEFAULT_MACHINE_FOLDER_LABEL)?
            .trim();

        (!value.is_empty()).then_some(value)
    })
}

/// Runs operations with the `VBoxManage` executable from a VirtualBox
/// installation directory.
pub struct VBoxManage {
    install_dir: Utf8PathBuf,
    executable: Utf8PathBuf,
}

impl VBoxManage {
    /// Finds `VBoxManage` in `install_dir`. Fails if the directory or the
    /// executable doesn't exist.
    pub fn locate(install_dir: &Utf8Path) -> Result<Self> {
        if !install_dir.is_dir() {
            anyhow::bail!(
                "VirtualBox installation directory '{install_dir}' does not \
                exist; pass --hypervisor-dir to point at your installation"
            );
        }

        let executable = find_in_install_dir(install_dir, "VBoxManage")?;
        Ok(Self { install_dir: install_dir.to_owned(), executable })
    }

    fn command(&self, operation: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(operation).args(args).current_dir(&self.install_dir);
        cmd
    }
}

impl Hypervisor for VBoxManage {
    fn run(
        &self,
        operation: &str,
        args: &[String],
        echo: Echo,
    ) -> Result<String> {
        let mut cmd = self.command(operation, args);
        match echo {
            Echo::Capture => {
                let output = run_command_check_status(&mut cmd)?;
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Echo::Inherit => {
                run_command_inherit_output(&mut cmd)?;
                Ok(String::new())
            }
        }
    }

    fn launch(&self, descriptor: &Utf8Path) -> Result<()> {
        let frontend = find_in_install_dir(&self.install_dir, "VirtualBox")?;
        let mut cmd = Command::new(&frontend);
        cmd.arg(descriptor)
            .current_dir(&self.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        cmd.spawn()
            .with_context(|| format!("launching '{}'", display_command(&cmd)))?;

        Ok(())
    }
}

fn find_in_install_dir(
    install_dir: &Utf8Path,
    name: &str,
) -> Result<Utf8PathBuf> {
    let path = which::which_in(name, Some(install_dir), install_dir)
        .with_context(|| format!("looking for {name} in '{install_dir}'"))?;

    Utf8PathBuf::from_path_buf(path).map_err(|p| {
        anyhow::anyhow!("path to {name} is not UTF-8: {}", p.display())
    })
}
