// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Defines the script that creates a VirtualBox VM around an installer image:
//! create and configure the VM, turn the installer image into a disk, create
//! an empty runtime disk, attach both, and open the VM.

use std::{collections::HashMap, rc::Rc};

use anyhow::{Context as _, Result};
use camino::Utf8Path;
use colored::Colorize;

use crate::{
    hypervisor::{Echo, Hypervisor},
    profile::{ProvisioningProfile, VmLayout},
    resolve::ResolvedInputs,
    runner::{Context, Script, ScriptStep, Ui},
    util::print_warning,
};

/// The parameters of a single provisioning run.
pub struct ProvisionArgs {
    pub vm_name: String,
    pub inputs: ResolvedInputs,
    pub profile: ProvisioningProfile,
    pub rollback_on_failure: bool,
}

pub struct ProvisionScript {
    steps: Vec<ScriptStep>,
    args: ProvisionArgs,
    layout: VmLayout,
    hypervisor: Rc<dyn Hypervisor>,
}

impl ProvisionScript {
    pub fn new(args: ProvisionArgs, hypervisor: Rc<dyn Hypervisor>) -> Self {
        let layout = VmLayout::new(
            &args.inputs.vm_base_path,
            &args.vm_name,
            &args.profile,
        );

        let provisioner = Rc::new(Provisioner {
            hypervisor: hypervisor.clone(),
            profile: args.profile.clone(),
        });

        Self { steps: get_script(provisioner), args, layout, hypervisor }
    }

    pub fn layout(&self) -> &VmLayout {
        &self.layout
    }
}

impl Script for ProvisionScript {
    fn steps(&self) -> &[ScriptStep] {
        self.steps.as_slice()
    }

    fn print_configuration(
        &self,
        w: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        writeln!(w, "Provisioning a VirtualBox VM with these options:\n")?;

        let args = &self.args;
        let profile = &args.profile;
        writeln!(w, "  {}: {}", "VM name".bold(), args.vm_name)?;
        writeln!(
            w,
            "  {}: {}",
            "Installer image".bold(),
            args.inputs.installer_image
        )?;
        writeln!(
            w,
            "  {}: {}",
            "VM directory".bold(),
            self.layout.vm_directory
        )?;
        writeln!(w)?;
        writeln!(
            w,
            "  {} CPUs, {} MiB RAM, {} MiB video RAM, {} firmware, guest OS \
            type {}",
            profile.cpus,
            profile.memory_mib,
            profile.vram_mib,
            profile.firmware,
            profile.os_type
        )?;
        writeln!(
            w,
            "  Installer disk: {} MiB {} on port {}",
            profile.installer_disk_mib,
            profile.installer_disk_format,
            profile.installer_disk_port
        )?;
        writeln!(
            w,
            "  Runtime disk: {} MiB {} on port {}",
            profile.runtime_disk_mib,
            profile.runtime_disk_format,
            profile.runtime_disk_port
        )?;

        if args.rollback_on_failure {
            writeln!(w, "  The VM will be removed if provisioning fails")?;
        }

        Ok(())
    }

    fn check_prerequisites(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let inputs = &self.args.inputs;
        if !inputs.installer_image.is_file() {
            errors.push(format!(
                "installer image '{}' is not a file",
                inputs.installer_image
            ));
        }

        if !inputs.vm_base_path.is_dir() {
            errors.push(format!(
                "VM storage directory '{}' is not a directory",
                inputs.vm_base_path
            ));
        }

        if self.layout.descriptor.exists() {
            errors.push(format!(
                "a VM already exists at '{}'",
                self.layout.descriptor
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn initial_context(&self) -> HashMap<String, String> {
        let args = &self.args;
        let layout = &self.layout;
        [
            ("vm_name".to_string(), args.vm_name.clone()),
            ("base_folder".to_string(), args.inputs.vm_base_path.to_string()),
            (
                "installer_image".to_string(),
                args.inputs.installer_image.to_string(),
            ),
            ("installer_disk".to_string(), layout.installer_disk.to_string()),
            ("runtime_disk".to_string(), layout.runtime_disk.to_string()),
            ("descriptor".to_string(), layout.descriptor.to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn on_failure(&self, ctx: &Context) {
        if !self.args.rollback_on_failure {
            print_warning(&format!(
                "provisioning stopped part way; anything already created in \
                '{}' was left in place",
                self.layout.vm_directory
            ));
            return;
        }

        for undo in ctx.undo_operations() {
            if let Err(e) =
                self.hypervisor.run(undo.operation, &undo.args, Echo::Capture)
            {
                print_warning(&format!(
                    "rollback operation '{} {}' failed: {e:#}",
                    undo.operation,
                    undo.args.join(" ")
                ));
            }
        }
    }
}

/// Carries out each provisioning step against a hypervisor.
struct Provisioner {
    hypervisor: Rc<dyn Hypervisor>,
    profile: ProvisioningProfile,
}

fn args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.into_iter().map(str::to_string).collect()
}

impl Provisioner {
    fn run(
        &self,
        ui: &Ui,
        operation: &str,
        args: Vec<String>,
        echo: Echo,
    ) -> Result<String> {
        ui.set_substep(format!("VBoxManage {operation}"));
        let run = || self.hypervisor.run(operation, &args, echo);
        let output = match echo {
            Echo::Capture => run(),
            Echo::Inherit => ui.suspend(run),
        };

        output.with_context(|| format!("VBoxManage {operation}"))
    }

    fn create_vm(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        let vm_name = ctx.require_var("vm_name")?.to_owned();
        self.run(
            ui,
            "createvm",
            args([
                "--name",
                &vm_name,
                "--basefolder",
                ctx.require_var("base_folder")?,
                "--ostype",
                self.profile.os_type,
                "--register",
            ]),
            Echo::Capture,
        )?;

        ctx.push_undo("unregistervm", args([vm_name.as_str(), "--delete"]));
        Ok(())
    }

    fn configure_vm(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        let p = &self.profile;
        self.run(
            ui,
            "modifyvm",
            args([
                ctx.require_var("vm_name")?,
                "--cpus",
                &p.cpus.to_string(),
                "--memory",
                &p.memory_mib.to_string(),
                "--vram",
                &p.vram_mib.to_string(),
                "--acpi",
                "on",
                "--hpet",
                "on",
                "--graphicscontroller",
                p.graphics_controller,
                "--firmware",
                p.firmware,
                "--usb",
                "on",
                "--bioslogodisplaytime",
                &p.bios_logo_display_time_ms.to_string(),
            ]),
            Echo::Capture,
        )
        .map(|_| ())
    }

    fn convert_installer_image(
        &self,
        ctx: &mut Context,
        ui: &Ui,
    ) -> Result<()> {
        let disk = ctx.require_var("installer_disk")?.to_owned();
        self.run(
            ui,
            "convertfromraw",
            args([
                ctx.require_var("installer_image")?,
                &disk,
                "--format",
                self.profile.installer_disk_format.as_arg(),
            ]),
            Echo::Inherit,
        )?;

        ctx.push_undo("closemedium", args(["disk", &disk, "--delete"]));
        Ok(())
    }

    fn resize_installer_disk(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        self.run(
            ui,
            "modifymedium",
            args([
                "disk",
                ctx.require_var("installer_disk")?,
                "--resize",
                &self.profile.installer_disk_mib.to_string(),
            ]),
            Echo::Inherit,
        )
        .map(|_| ())
    }

    fn add_storage_controller(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        self.run(
            ui,
            "storagectl",
            args([
                ctx.require_var("vm_name")?,
                "--name",
                self.profile.controller_name,
                "--add",
                "sata",
                "--controller",
                self.profile.controller_chipset,
                "--hostiocache",
                "on",
                "--bootable",
                "on",
            ]),
            Echo::Capture,
        )
        .map(|_| ())
    }

    /// Attaches the disk named by `disk_var`. From then on the disk belongs
    /// to the VM: VirtualBox won't close an attached medium, and unregistering
    /// the VM with `--delete` removes it.
    fn attach_disk(
        &self,
        ctx: &mut Context,
        ui: &Ui,
        port: u32,
        disk_var: &str,
    ) -> Result<()> {
        let disk = ctx.require_var(disk_var)?.to_owned();
        self.run(
            ui,
            "storageattach",
            args([
                ctx.require_var("vm_name")?,
                "--storagectl",
                self.profile.controller_name,
                "--port",
                &port.to_string(),
                "--device",
                "0",
                "--type",
                "hdd",
                "--medium",
                &disk,
            ]),
            Echo::Capture,
        )?;

        ctx.retain_undo(|undo| {
            !(undo.operation == "closemedium" && undo.args.contains(&disk))
        });
        Ok(())
    }

    fn attach_installer_disk(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        self.attach_disk(
            ctx,
            ui,
            self.profile.installer_disk_port,
            "installer_disk",
        )
    }

    fn create_runtime_disk(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        let disk = ctx.require_var("runtime_disk")?.to_owned();
        self.run(
            ui,
            "createmedium",
            args([
                "disk",
                "--filename",
                &disk,
                "--size",
                &self.profile.runtime_disk_mib.to_string(),
                "--format",
                self.profile.runtime_disk_format.as_arg(),
            ]),
            Echo::Inherit,
        )?;

        ctx.push_undo("closemedium", args(["disk", &disk, "--delete"]));
        Ok(())
    }

    fn attach_runtime_disk(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        self.attach_disk(
            ctx,
            ui,
            self.profile.runtime_disk_port,
            "runtime_disk",
        )
    }

    fn launch_vm(&self, ctx: &mut Context, ui: &Ui) -> Result<()> {
        let descriptor = ctx.require_var("descriptor")?;
        ui.set_substep(format!("opening {descriptor}"));
        self.hypervisor.launch(Utf8Path::new(descriptor))
    }
}

type ProvisionFn = fn(&Provisioner, &mut Context, &Ui) -> Result<()>;

fn get_script(provisioner: Rc<Provisioner>) -> Vec<ScriptStep> {
    let step = |label: &'static str, func: ProvisionFn| {
        let provisioner = provisioner.clone();
        ScriptStep::new(label, move |ctx, ui| func(&provisioner, ctx, ui))
    };

    vec![
        step("create and register VM", Provisioner::create_vm),
        step("configure VM hardware", Provisioner::configure_vm),
        step(
            "convert installer image to a VM disk",
            Provisioner::convert_installer_image,
        ),
        step("resize installer disk", Provisioner::resize_installer_disk),
        step("add SATA controller", Provisioner::add_storage_controller),
        step("attach installer disk", Provisioner::attach_installer_disk),
        step("create runtime disk", Provisioner::create_runtime_disk),
        step("attach runtime disk", Provisioner::attach_runtime_disk),
        step("open VM", Provisioner::launch_vm),
    ]
}
