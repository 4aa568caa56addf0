// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utility functions shared by the resolver, the hypervisor client, and the
//! provisioning script.

use std::process::{Command, Output, Stdio};

use colored::Colorize;
use itertools::Itertools;

/// Renders `cmd` roughly as a user would type it.
pub fn display_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| {
            let s = s.to_string_lossy();
            if s.contains(char::is_whitespace) {
                format!("\"{s}\"")
            } else {
                s.into_owned()
            }
        })
        .join(" ")
}

/// Runs a `Command`, capturing its output. Returns `Err` if the command's exit
/// status indicates that it failed.
pub fn run_command_check_status(cmd: &mut Command) -> anyhow::Result<Output> {
    let output = cmd.stdin(Stdio::null()).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "'{}' returned non-success exit code {:?}\nstdout: {}\nstderr: {}",
            display_command(cmd),
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).trim_end(),
            String::from_utf8_lossy(&output.stderr).trim_end(),
        );
    }

    Ok(output)
}

/// Runs a `Command` with its output going straight to this process's stdout
/// and stderr. Returns `Err` if the command's exit status indicates that it
/// failed.
pub fn run_command_inherit_output(cmd: &mut Command) -> anyhow::Result<()> {
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;

    if !status.success() {
        anyhow::bail!(
            "'{}' returned non-success exit code {:?}",
            display_command(cmd),
            status.code()
        );
    }

    Ok(())
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let mut cmd = Command::new("VBoxManage");
        cmd.args(["storagectl", "vm", "--name", "SATA Controller"]);

        assert_eq!(
            display_command(&cmd),
            "VBoxManage storagectl vm --name \"SATA Controller\""
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_its_output() {
        let err = run_command_check_status(
            Command::new("sh").args(["-c", "echo oops >&2; exit 3"]),
        )
        .unwrap_err()
        .to_string();

        assert!(err.contains("Some(3)"), "{err}");
        assert!(err.contains("oops"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn successful_command_returns_stdout() {
        let output =
            run_command_check_status(Command::new("sh").args(["-c", "echo hi"]))
                .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout), "hi\n");
    }
}
