// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use clap::Parser;

#[cfg(target_os = "windows")]
pub const DEFAULT_HYPERVISOR_DIR: &str = r"C:\Program Files\Oracle\VirtualBox";

#[cfg(target_os = "macos")]
pub const DEFAULT_HYPERVISOR_DIR: &str =
    "/Applications/VirtualBox.app/Contents/MacOS";

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_HYPERVISOR_DIR: &str = "/usr/lib/virtualbox";

#[derive(Parser)]
#[command(about = "Creates a VirtualBox VM that boots an OS installer image")]
pub struct App {
    /// The name of the VM to create. This is also the name of the directory,
    /// inside the VM storage directory, that holds the VM's files.
    #[arg(long, value_parser = parse_vm_name)]
    pub vm_name: String,

    /// The installer image (.iso or .img) to convert into the VM's installer
    /// disk. Relative paths are resolved against the current directory. If
    /// not supplied, or if the file doesn't exist, the tool asks for one.
    #[arg(long)]
    pub installer_image: Option<Utf8PathBuf>,

    /// The directory in which to create the VM's directory. If not supplied,
    /// or if the directory doesn't exist, the tool asks for one, suggesting
    /// VirtualBox's default machine folder.
    #[arg(long)]
    pub vm_storage: Option<Utf8PathBuf>,

    /// The VirtualBox installation directory, which must contain the
    /// VBoxManage executable.
    #[arg(long, default_value = DEFAULT_HYPERVISOR_DIR)]
    pub hypervisor_dir: Utf8PathBuf,

    /// Forces the tool to run in an interactive or non-interactive mode. If not
    /// set, the tool infers whether to run interactively from whether it is
    /// running in an interactive terminal. Non-interactive runs never prompt
    /// for missing paths.
    #[arg(long, default_value = Option::None)]
    pub interactive: Option<bool>,

    /// Unregisters the VM and deletes the disks created so far if a
    /// provisioning step fails. By default partially created VMs are left in
    /// place.
    #[arg(long, default_value_t = false)]
    pub rollback_on_failure: bool,
}

fn parse_vm_name(name: &str) -> Result<String, String> {
    if name.trim().is_empty() {
        return Err("VM name must not be empty".to_string());
    }

    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(format!(
            "VM name '{name}' can't be used as a directory name"
        ));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let app = App::try_parse_from(["boxstrap", "--vm-name", "TC1"])
            .expect("minimal args should parse");

        assert_eq!(app.vm_name, "TC1");
        assert!(app.installer_image.is_none());
        assert!(app.vm_storage.is_none());
        assert_eq!(app.hypervisor_dir, DEFAULT_HYPERVISOR_DIR);
        assert!(!app.rollback_on_failure);
    }

    #[test]
    fn vm_name_is_required() {
        assert!(App::try_parse_from(["boxstrap"]).is_err());
    }

    #[test]
    fn rejects_unusable_vm_names() {
        for name in ["", "  ", "a/b", r"a\b", ".."] {
            assert!(
                App::try_parse_from(["boxstrap", "--vm-name", name]).is_err(),
                "'{name}' should be rejected"
            );
        }
    }
}
