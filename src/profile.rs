// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed hardware profile for provisioned VMs and the naming convention
//! for the files that make up a VM.

use camino::{Utf8Path, Utf8PathBuf};

/// The resources and settings every provisioned VM receives.
#[derive(Clone, Debug)]
pub struct ProvisioningProfile {
    pub os_type: &'static str,
    pub cpus: u32,
    pub memory_mib: u32,
    pub vram_mib: u32,
    pub graphics_controller: &'static str,
    pub firmware: &'static str,
    pub bios_logo_display_time_ms: u32,

    /// The name of the SATA controller both disks are attached to.
    pub controller_name: &'static str,
    pub controller_chipset: &'static str,

    /// The installer image is converted into this format and resized to
    /// `installer_disk_mib`, whatever its original size.
    pub installer_disk_format: DiskFormat,
    pub installer_disk_mib: u64,
    pub installer_disk_port: u32,

    /// The empty disk the guest OS gets installed to. It sits on the port the
    /// firmware prefers to boot from.
    pub runtime_disk_format: DiskFormat,
    pub runtime_disk_mib: u64,
    pub runtime_disk_port: u32,
}

impl Default for ProvisioningProfile {
    fn default() -> Self {
        Self {
            os_type: "FreeBSD_64",
            cpus: 2,
            memory_mib: 1024,
            vram_mib: 128,
            graphics_controller: "vmsvga",
            firmware: "efi64",
            bios_logo_display_time_ms: 0,
            controller_name: "SATA Controller",
            controller_chipset: "IntelAhci",
            installer_disk_format: DiskFormat::Vdi,
            installer_disk_mib: 8192,
            installer_disk_port: 1,
            runtime_disk_format: DiskFormat::Vhd,
            runtime_disk_mib: 16384,
            runtime_disk_port: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskFormat {
    /// VirtualBox's native format.
    Vdi,
    /// The portable Virtual Hard Disk format.
    Vhd,
}

impl DiskFormat {
    /// The value VBoxManage expects for `--format`.
    pub fn as_arg(self) -> &'static str {
        match self {
            DiskFormat::Vdi => "VDI",
            DiskFormat::Vhd => "VHD",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DiskFormat::Vdi => "vdi",
            DiskFormat::Vhd => "vhd",
        }
    }
}

impl std::fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_arg())
    }
}

pub const DESCRIPTOR_EXTENSION: &str = "vbox";

/// Where a VM's files live, derived from the storage directory and VM name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmLayout {
    pub vm_directory: Utf8PathBuf,
    pub installer_disk: Utf8PathBuf,
    pub runtime_disk: Utf8PathBuf,
    pub descriptor: Utf8PathBuf,
}

impl VmLayout {
    pub fn new(
        base_path: &Utf8Path,
        vm_name: &str,
        profile: &ProvisioningProfile,
    ) -> Self {
        let vm_directory = base_path.join(vm_name);
        let installer_disk = vm_directory.join(format!(
            "{vm_name}_installer.{}",
            profile.installer_disk_format.extension()
        ));
        let runtime_disk = vm_directory.join(format!(
            "{vm_name}.{}",
            profile.runtime_disk_format.extension()
        ));
        let descriptor =
            vm_directory.join(format!("{vm_name}.{DESCRIPTOR_EXTENSION}"));

        Self { vm_directory, installer_disk, runtime_disk, descriptor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_naming_convention() {
        let layout = VmLayout::new(
            Utf8Path::new("/tmp/vms"),
            "TC1",
            &ProvisioningProfile::default(),
        );

        assert_eq!(layout.vm_directory, "/tmp/vms/TC1");
        assert_eq!(layout.installer_disk, "/tmp/vms/TC1/TC1_installer.vdi");
        assert_eq!(layout.runtime_disk, "/tmp/vms/TC1/TC1.vhd");
        assert_eq!(layout.descriptor, "/tmp/vms/TC1/TC1.vbox");
    }

    #[test]
    fn disk_extensions_track_profile_formats() {
        let profile = ProvisioningProfile {
            runtime_disk_format: DiskFormat::Vdi,
            ..Default::default()
        };

        let layout = VmLayout::new(Utf8Path::new("/vms"), "x", &profile);
        assert_eq!(layout.runtime_disk, "/vms/x/x.vdi");
    }
}
