// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structs, traits, and functions for defining and running a set of scripted
//! operations.

use std::{borrow::Cow, collections::HashMap};

use anyhow::Context as _;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const PROGRESS_TICK_INTERVAL: std::time::Duration =
    std::time::Duration::from_millis(100);

type StepFn = dyn Fn(&mut Context, &Ui) -> anyhow::Result<()>;

/// A step in a scripted procedure.
pub struct ScriptStep {
    /// A descriptive label for this procedure step.
    label: &'static str,

    /// The function to execute to run this procedure step.
    func: Box<StepFn>,
}

impl ScriptStep {
    pub fn new(
        label: &'static str,
        func: impl Fn(&mut Context, &Ui) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self { label, func: Box::new(func) }
    }
}

/// Implemented by objects that can be used as scripts.
pub trait Script {
    /// Yields a slice of steps that can be executed to run this script.
    fn steps(&self) -> &[ScriptStep];

    fn print_configuration(
        &self,
        w: &mut dyn std::io::Write,
    ) -> std::io::Result<()>;

    /// Checks that the script can start. Returns one message per unsatisfied
    /// prerequisite.
    fn check_prerequisites(&self) -> Result<(), Vec<String>>;

    /// Yields a `HashMap` that contains key-value pairs that should be inserted
    /// into the script's `[Context]` prior to running it.
    fn initial_context(&self) -> HashMap<String, String>;

    /// Called with the context as the failed step left it when a step
    /// returns an error.
    fn on_failure(&self, _ctx: &Context) {}
}

struct StepAndProgress<'a> {
    step: &'a ScriptStep,
    bar: ProgressBar,
}

/// Runs a script, pretty-printing its various labels and the outcomes of each
/// step.
pub fn run_script(
    script: &dyn Script,
    interactive: bool,
) -> anyhow::Result<()> {
    script.print_configuration(&mut std::io::stdout())?;
    println!();

    if let Err(e) = script.check_prerequisites() {
        let s = "Some prerequisites were not satisfied:".bold();
        println!("{}", s);

        for unsatisfied in e.iter() {
            println!("  {}", unsatisfied);
        }

        println!();
        anyhow::bail!("some script prerequisites weren't satisfied");
    }

    let pending_style = ProgressStyle::with_template("  {msg:.dim}")?;
    let done_style = ProgressStyle::with_template("✓ {msg:.green}")?;
    let failed_style = ProgressStyle::with_template("⚠ {msg:.bold.red}")?;

    let mut ctx = Context::new(script.initial_context());
    let multi = interactive.then(MultiProgress::new);

    let steps_with_progress: Vec<StepAndProgress> = script
        .steps()
        .iter()
        .map(|step| {
            let bar = if let Some(multi) = &multi {
                multi.add(ProgressBar::new_spinner())
            } else {
                ProgressBar::hidden()
            };

            bar.set_message(step.label);
            bar.set_style(pending_style.clone());
            bar.tick();
            StepAndProgress { step, bar }
        })
        .collect();

    for step in steps_with_progress {
        step.bar.set_style(ProgressStyle::default_spinner());
        step.bar.enable_steady_tick(PROGRESS_TICK_INTERVAL);
        if !interactive {
            println!("{}", step.step.label.bold());
        }

        let ui = Ui { current_step: &step, multi: multi.as_ref() };
        match (step.step.func)(&mut ctx, &ui) {
            Ok(()) => {
                step.bar.set_message(step.step.label);
                step.bar.set_style(done_style.clone());
                step.bar.finish();
            }
            Err(e) => {
                step.bar.set_style(failed_style.clone());
                step.bar.finish();
                script.on_failure(&ctx);
                return Err(e.context(format!("step '{}'", step.step.label)));
            }
        }
    }

    Ok(())
}

/// A shared script execution context, provided to each step in a running
/// script. Each context contains a key-value store that individual steps can
/// use to pass values to future steps, and an undo log of operations that
/// reverse what earlier steps did. The `[Script]` trait's `initial_context`
/// function allows each script to populate the store before the script
/// executes.
pub struct Context {
    vars: HashMap<String, String>,
    undo: Vec<UndoOperation>,
}

/// An operation that reverses the effect of a completed step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoOperation {
    pub operation: &'static str,
    pub args: Vec<String>,
}

impl Context {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars, undo: Vec::new() }
    }

    /// Gets the value of the supplied `var`, returning `None` if the value is
    /// not in the store.
    pub fn get_var(&self, var: &str) -> Option<&str> {
        self.vars.get(var).map(|v| v.as_str())
    }

    /// Gets the value of the supplied `var`, returning `Err` if the value is
    /// not in the store.
    pub fn require_var(&self, var: &str) -> anyhow::Result<&str> {
        self.get_var(var)
            .with_context(|| format!("script variable '{var}' is not set"))
    }

    /// Records an operation that undoes a step that just completed.
    pub fn push_undo(&mut self, operation: &'static str, args: Vec<String>) {
        self.undo.push(UndoOperation { operation, args });
    }

    /// Drops recorded undo operations for which `keep` returns `false`.
    pub fn retain_undo(&mut self, keep: impl FnMut(&UndoOperation) -> bool) {
        self.undo.retain(keep);
    }

    /// Yields the undo log, most recently recorded operation first.
    pub fn undo_operations(&self) -> impl Iterator<Item = &UndoOperation> {
        self.undo.iter().rev()
    }
}

pub struct Ui<'step, 'progress> {
    current_step: &'progress StepAndProgress<'step>,
    multi: Option<&'progress MultiProgress>,
}

impl Ui<'_, '_> {
    pub fn set_substep(&self, substep: impl Into<Cow<'static, str>>) {
        let bar = &self.current_step.bar;
        bar.set_message(format!(
            "{}: {}",
            self.current_step.step.label,
            &substep.into()
        ));
    }

    /// Runs `f` with the progress display cleared, so that anything `f`
    /// writes to the terminal isn't drawn over.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.multi {
            Some(multi) => multi.suspend(f),
            None => f(),
        }
    }
}
