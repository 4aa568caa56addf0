// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! boxstrap: sets up a VirtualBox VM that boots straight into an OS installer
//! image.

use std::rc::Rc;

use app::App;
use camino::Utf8PathBuf;
use clap::Parser;
use colored::Colorize;

use crate::{
    hypervisor::{Hypervisor, VBoxManage},
    profile::{ProvisioningProfile, VmLayout},
    provision::{ProvisionArgs, ProvisionScript},
    resolve::{
        fallback_machine_folder, NonInteractivePrompt, PathResolver, Prompt,
        ResolveError, ResolvedInputs, TerminalPrompt,
    },
};

pub mod app;
pub mod hypervisor;
pub mod profile;
pub mod provision;
pub mod resolve;
pub mod runner;
pub mod util;

fn main() -> anyhow::Result<()> {
    let app = App::parse();
    let interactive = match app.interactive {
        Some(val) => val,
        None => atty::is(atty::Stream::Stdout),
    };

    let vbox = Rc::new(VBoxManage::locate(&app.hypervisor_dir)?);

    let working_dir = Utf8PathBuf::from_path_buf(std::env::current_dir()?)
        .map_err(|p| {
            anyhow::anyhow!("working directory '{}' is not UTF-8", p.display())
        })?;

    let prompt: Box<dyn Prompt> = if interactive {
        Box::new(TerminalPrompt::stdio())
    } else {
        Box::new(NonInteractivePrompt)
    };

    let Some(layout) =
        provision_vm(&app, prompt.as_ref(), vbox, working_dir, interactive)?
    else {
        return Ok(());
    };

    println!();
    println!(
        "{} VM '{}' created in {}",
        "Done:".green().bold(),
        app.vm_name,
        layout.vm_directory
    );

    Ok(())
}

/// Resolves the paths the VM needs, asking through `prompt` where necessary,
/// then provisions it. Returns `None` without touching the hypervisor beyond
/// queries if the user cancels a prompt.
fn provision_vm(
    app: &App,
    prompt: &dyn Prompt,
    hypervisor: Rc<dyn Hypervisor>,
    working_dir: Utf8PathBuf,
    interactive: bool,
) -> anyhow::Result<Option<VmLayout>> {
    let resolver = PathResolver::new(prompt, working_dir);
    let inputs = match resolve_inputs(app, &resolver, hypervisor.as_ref()) {
        Ok(inputs) => inputs,
        Err(e @ ResolveError::Cancelled { .. }) => {
            prompt.warn(&e.to_string());
            return Ok(None);
        }
    };

    let script = ProvisionScript::new(
        ProvisionArgs {
            vm_name: app.vm_name.clone(),
            inputs,
            profile: ProvisioningProfile::default(),
            rollback_on_failure: app.rollback_on_failure,
        },
        hypervisor,
    );

    runner::run_script(&script, interactive)?;
    Ok(Some(script.layout().clone()))
}

fn resolve_inputs(
    app: &App,
    resolver: &PathResolver,
    hypervisor: &dyn Hypervisor,
) -> Result<ResolvedInputs, ResolveError> {
    let vm_base_path =
        resolver.resolve_storage_path(app.vm_storage.as_deref(), || {
            hypervisor
                .default_machine_folder()
                .unwrap_or_else(fallback_machine_folder)
        })?;

    let installer_image =
        resolver.resolve_image_path(app.installer_image.as_deref())?;

    Ok(ResolvedInputs { installer_image, vm_base_path })
}
