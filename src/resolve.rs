// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolves the VM storage directory and the installer image from command-line
//! arguments, falling back to asking the user.

use std::{
    cell::RefCell,
    io::{BufRead, Write},
};

use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;

use crate::util::print_warning;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no {what} was selected; {guidance}")]
    Cancelled { what: &'static str, guidance: String },
}

/// A named set of file extensions a file prompt can restrict itself to. An
/// empty extension list matches every file.
#[derive(Clone, Copy, Debug)]
pub struct FileFilter {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
}

impl FileFilter {
    pub fn matches(&self, path: &Utf8Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        path.extension().is_some_and(|ext| {
            self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        })
    }
}

pub const INSTALLER_IMAGE_FILTERS: &[FileFilter] = &[
    FileFilter {
        name: "Installer images (*.iso, *.img)",
        extensions: &["iso", "img"],
    },
    FileFilter { name: "ISO images (*.iso)", extensions: &["iso"] },
    FileFilter { name: "Raw disk images (*.img)", extensions: &["img"] },
    FileFilter { name: "All files", extensions: &[] },
];

/// Implemented by objects that can show warnings to the user and ask them for
/// paths. The `pick_` functions return `None` if the user makes no selection.
pub trait Prompt {
    fn warn(&self, message: &str);

    fn pick_directory(
        &self,
        title: &str,
        suggestion: &Utf8Path,
    ) -> Option<Utf8PathBuf>;

    fn pick_file(
        &self,
        title: &str,
        start_dir: &Utf8Path,
        filters: &[FileFilter],
    ) -> Option<Utf8PathBuf>;
}

/// The filesystem inputs to provisioning. Both paths existed when they were
/// resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedInputs {
    pub installer_image: Utf8PathBuf,
    pub vm_base_path: Utf8PathBuf,
}

pub struct PathResolver<'a> {
    prompt: &'a dyn Prompt,
    working_dir: Utf8PathBuf,
}

impl<'a> PathResolver<'a> {
    /// Creates a resolver that interprets relative paths against
    /// `working_dir`.
    pub fn new(prompt: &'a dyn Prompt, working_dir: Utf8PathBuf) -> Self {
        Self { prompt, working_dir }
    }

    /// Resolves the directory that will hold the VM's directory. An existing
    /// `explicit` directory is used as is. Otherwise the user is asked, with
    /// the path from `default_provider` as the suggested answer.
    pub fn resolve_storage_path(
        &self,
        explicit: Option<&Utf8Path>,
        default_provider: impl FnOnce() -> Utf8PathBuf,
    ) -> Result<Utf8PathBuf, ResolveError> {
        if let Some(explicit) = explicit {
            let path = self.working_dir.join(explicit);
            if path.is_dir() {
                return Ok(path);
            }

            self.prompt.warn(&format!(
                "VM storage directory '{path}' does not exist; choose another"
            ));
        }

        let suggestion = default_provider();
        loop {
            let picked = self
                .prompt
                .pick_directory("Choose a directory for the VM", &suggestion)
                .ok_or_else(|| ResolveError::Cancelled {
                    what: "VM storage directory",
                    guidance: "pass --vm-storage or choose a directory when \
                        asked"
                        .to_string(),
                })?;

            let picked = self.working_dir.join(picked);
            if picked.is_dir() {
                return Ok(picked);
            }

            self.prompt.warn(&format!("'{picked}' is not a directory"));
        }
    }

    /// Resolves the installer image. `explicit` is interpreted relative to the
    /// working directory; if it doesn't name an existing file the user is asked
    /// to pick one.
    pub fn resolve_image_path(
        &self,
        explicit: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, ResolveError> {
        let guidance = match explicit {
            Some(explicit) => {
                let path = self.working_dir.join(explicit);
                if path.is_file() {
                    return Ok(path);
                }

                let name = path.file_name().unwrap_or(explicit.as_str());
                let dir = path.parent().unwrap_or(self.working_dir.as_path());
                self.prompt.warn(&format!(
                    "installer image '{name}' was not found in '{dir}'"
                ));

                format!(
                    "place '{name}' in '{dir}' or choose another installer \
                    image"
                )
            }
            None => "pass --installer-image or choose an image when asked"
                .to_string(),
        };

        loop {
            let picked = self
                .prompt
                .pick_file(
                    "Choose an installer image",
                    &self.working_dir,
                    INSTALLER_IMAGE_FILTERS,
                )
                .ok_or_else(|| ResolveError::Cancelled {
                    what: "installer image",
                    guidance: guidance.clone(),
                })?;

            let picked = self.working_dir.join(picked);
            if picked.is_file() {
                return Ok(picked);
            }

            self.prompt.warn(&format!("'{picked}' is not a file"));
        }
    }
}

/// The path suggested when asking for a storage directory if the hypervisor
/// doesn't report a default machine folder: `VirtualBox VMs` in the user's home
/// directory.
pub fn fallback_machine_folder() -> Utf8PathBuf {
    dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
        .join("VirtualBox VMs")
}

/// Asks for paths on a terminal, one line at a time. End of input cancels a
/// prompt.
pub struct TerminalPrompt<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl TerminalPrompt<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input: RefCell::new(input), output: RefCell::new(output) }
    }

    /// Prints `question` and reads one trimmed line. Returns `None` at end of
    /// input or if the terminal can't be used.
    fn ask(&self, question: &str) -> Option<String> {
        let mut output = self.output.borrow_mut();
        write!(output, "{question} ").ok()?;
        output.flush().ok()?;

        let mut line = String::new();
        match self.input.borrow_mut().read_line(&mut line) {
            Ok(0) | Err(_) => {
                writeln!(output).ok()?;
                None
            }
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    /// Prints `message` on its own line. Returns `None` if the terminal can't
    /// be used.
    fn say(&self, message: &str) -> Option<()> {
        writeln!(self.output.borrow_mut(), "{message}").ok()
    }
}

impl<R: BufRead, W: Write> Prompt for TerminalPrompt<R, W> {
    fn warn(&self, message: &str) {
        let shown =
            self.say(&format!("{} {}", "warning:".yellow().bold(), message));

        if shown.is_none() {
            print_warning(message);
        }
    }

    fn pick_directory(
        &self,
        title: &str,
        suggestion: &Utf8Path,
    ) -> Option<Utf8PathBuf> {
        self.say(&format!(
            "{} (Enter accepts the suggestion, end of input cancels)",
            title.bold()
        ))?;

        loop {
            let answer = self.ask(&format!("  [{suggestion}]:"))?;
            let dir = if answer.is_empty() {
                suggestion.to_owned()
            } else {
                Utf8PathBuf::from(answer)
            };

            if dir.is_dir() {
                return Some(dir);
            }

            self.warn(&format!("'{dir}' is not a directory"));
        }
    }

    fn pick_file(
        &self,
        title: &str,
        start_dir: &Utf8Path,
        filters: &[FileFilter],
    ) -> Option<Utf8PathBuf> {
        self.say(&format!(
            "{} (paths are relative to '{start_dir}', an empty answer \
            cancels)",
            title.bold()
        ))?;

        let filter = if filters.len() > 1 {
            for (i, filter) in filters.iter().enumerate() {
                self.say(&format!("  {}) {}", i + 1, filter.name))?;
            }

            loop {
                let answer = self.ask("  File type [1]:")?;
                if answer.is_empty() {
                    break filters.first();
                }

                match answer.parse::<usize>() {
                    Ok(n) if (1..=filters.len()).contains(&n) => {
                        break filters.get(n - 1)
                    }
                    _ => self.warn(&format!("'{answer}' is not a choice")),
                }
            }
        } else {
            filters.first()
        };

        loop {
            let answer = self.ask("  File:")?;
            if answer.is_empty() {
                return None;
            }

            let file = start_dir.join(&answer);
            if !file.is_file() {
                self.warn(&format!("'{file}' is not a file"));
                continue;
            }

            if let Some(filter) = filter.filter(|f| !f.matches(&file)) {
                self.warn(&format!("'{file}' doesn't match {}", filter.name));
                continue;
            }

            return Some(file);
        }
    }
}

/// A prompt for runs without a terminal. Every question is cancelled.
pub struct NonInteractivePrompt;

impl Prompt for NonInteractivePrompt {
    fn warn(&self, message: &str) {
        print_warning(message);
    }

    fn pick_directory(&self, title: &str, _: &Utf8Path) -> Option<Utf8PathBuf> {
        print_warning(&format!("can't ask '{title}' in non-interactive mode"));
        None
    }

    fn pick_file(
        &self,
        title: &str,
        _: &Utf8Path,
        _: &[FileFilter],
    ) -> Option<Utf8PathBuf> {
        print_warning(&format!("can't ask '{title}' in non-interactive mode"));
        None
    }
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::testing::ScriptedPrompt;
    use super::*;
    use crate::hypervisor::{testing::RecordingHypervisor, Hypervisor};

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn no_default() -> Utf8PathBuf {
        panic!("default provider should not be consulted")
    }

    #[test]
    fn existing_explicit_storage_path_skips_prompt() {
        let (_guard, dir) = temp_dir();
        let prompt = ScriptedPrompt::default();
        let resolver = PathResolver::new(&prompt, dir.clone());

        let resolved =
            resolver.resolve_storage_path(Some(&dir), no_default).unwrap();

        assert_eq!(resolved, dir);
        assert_eq!(prompt.prompts(), 0);
        assert!(prompt.warnings.borrow().is_empty());
    }

    #[test]
    fn missing_explicit_storage_path_prompts_once() {
        let (_guard, dir) = temp_dir();
        let chosen = dir.join("chosen");
        std::fs::create_dir(&chosen).unwrap();

        let prompt = ScriptedPrompt::answering([Some(chosen.clone())]);
        let resolver = PathResolver::new(&prompt, dir.clone());
        let resolved = resolver
            .resolve_storage_path(Some(&dir.join("gone")), || dir.clone())
            .unwrap();

        assert_eq!(resolved, chosen);
        assert_eq!(prompt.prompts(), 1);
        assert_eq!(prompt.warnings.borrow().len(), 1);
        assert!(prompt.warnings.borrow()[0].contains("gone"));
    }

    #[test]
    fn failed_default_query_suggests_fallback() {
        let (_guard, dir) = temp_dir();
        let hv = RecordingHypervisor::default();
        let prompt = ScriptedPrompt::answering([Some(dir.clone())]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        resolver
            .resolve_storage_path(None, || {
                hv.default_machine_folder()
                    .unwrap_or_else(fallback_machine_folder)
            })
            .unwrap();

        assert_eq!(
            *prompt.directory_suggestions.borrow(),
            [fallback_machine_folder()]
        );
    }

    #[test]
    fn reported_default_folder_is_suggested() {
        let (_guard, dir) = temp_dir();
        let hv = RecordingHypervisor {
            list_output: Some(format!("Default machine folder: {dir}\n")),
            ..Default::default()
        };
        let prompt = ScriptedPrompt::answering([Some(dir.clone())]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        resolver
            .resolve_storage_path(None, || {
                hv.default_machine_folder()
                    .unwrap_or_else(fallback_machine_folder)
            })
            .unwrap();

        assert_eq!(*prompt.directory_suggestions.borrow(), [dir]);
    }

    #[test]
    fn cancelled_storage_prompt_is_an_error() {
        let (_guard, dir) = temp_dir();
        let prompt = ScriptedPrompt::answering([None]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        let err = resolver.resolve_storage_path(None, || dir.clone());
        assert!(matches!(
            err,
            Err(ResolveError::Cancelled { what: "VM storage directory", .. })
        ));
    }

    #[test]
    fn nonexistent_pick_is_asked_again() {
        let (_guard, dir) = temp_dir();
        let prompt = ScriptedPrompt::answering([
            Some(dir.join("nope")),
            Some(dir.clone()),
        ]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        let resolved =
            resolver.resolve_storage_path(None, || dir.clone()).unwrap();
        assert_eq!(resolved, dir);
        assert_eq!(prompt.prompts(), 2);
    }

    #[test]
    fn relative_image_resolves_against_working_dir() {
        let (_guard, dir) = temp_dir();
        std::fs::write(dir.join("disk.iso"), b"").unwrap();
        let prompt = ScriptedPrompt::default();
        let resolver = PathResolver::new(&prompt, dir.clone());

        let resolved = resolver
            .resolve_image_path(Some(Utf8Path::new("disk.iso")))
            .unwrap();

        assert_eq!(resolved, dir.join("disk.iso"));
        assert_eq!(prompt.prompts(), 0);
    }

    #[test]
    fn missing_image_warns_with_name_and_directory() {
        let (_guard, dir) = temp_dir();
        std::fs::write(dir.join("other.img"), b"").unwrap();
        let prompt =
            ScriptedPrompt::answering([Some(Utf8PathBuf::from("other.img"))]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        let resolved = resolver
            .resolve_image_path(Some(Utf8Path::new("disk.iso")))
            .unwrap();

        assert_eq!(resolved, dir.join("other.img"));
        let warnings = prompt.warnings.borrow();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'disk.iso'"), "{}", warnings[0]);
        assert!(warnings[0].contains(dir.as_str()), "{}", warnings[0]);
    }

    #[test]
    fn no_explicit_image_goes_straight_to_prompt() {
        let (_guard, dir) = temp_dir();
        let prompt = ScriptedPrompt::answering([None]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        let err = resolver.resolve_image_path(None).unwrap_err();
        assert!(prompt.warnings.borrow().is_empty());
        assert_eq!(*prompt.file_prompts.borrow(), 1);
        assert!(err.to_string().contains("--installer-image"));
    }

    #[test]
    fn cancelled_image_prompt_explains_where_to_put_file() {
        let (_guard, dir) = temp_dir();
        let prompt = ScriptedPrompt::answering([None]);
        let resolver = PathResolver::new(&prompt, dir.clone());

        let err = resolver
            .resolve_image_path(Some(Utf8Path::new("disk.iso")))
            .unwrap_err()
            .to_string();

        assert!(err.contains("place 'disk.iso' in"), "{err}");
    }

    #[test]
    fn filters_match_extensions_case_insensitively() {
        let [both, iso, img, all] = INSTALLER_IMAGE_FILTERS else {
            panic!("unexpected filter set");
        };

        assert!(both.matches(Utf8Path::new("a.ISO")));
        assert!(both.matches(Utf8Path::new("a.img")));
        assert!(!both.matches(Utf8Path::new("a.vdi")));
        assert!(iso.matches(Utf8Path::new("a.iso")));
        assert!(!iso.matches(Utf8Path::new("a.img")));
        assert!(img.matches(Utf8Path::new("a.img")));
        assert!(all.matches(Utf8Path::new("README")));
    }

    #[test]
    fn terminal_directory_prompt_accepts_suggestion() {
        let (_guard, dir) = temp_dir();
        let prompt = TerminalPrompt::new(Cursor::new("\n"), Vec::new());

        assert_eq!(prompt.pick_directory("pick", &dir), Some(dir));
    }

    #[test]
    fn terminal_prompts_cancel_at_end_of_input() {
        let (_guard, dir) = temp_dir();
        let prompt = TerminalPrompt::new(Cursor::new(""), Vec::new());

        assert_eq!(prompt.pick_directory("pick", &dir), None);
        assert_eq!(
            prompt.pick_file("pick", &dir, INSTALLER_IMAGE_FILTERS),
            None
        );
    }

    struct BrokenTerminal;

    impl Write for BrokenTerminal {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn unwritable_terminal_cancels_prompts() {
        let (_guard, dir) = temp_dir();
        std::fs::write(dir.join("disk.iso"), b"").unwrap();

        // Answers are available, but the questions can't be shown.
        let input = Cursor::new("\n1\ndisk.iso\n");
        let prompt = TerminalPrompt::new(input, BrokenTerminal);

        assert_eq!(prompt.pick_directory("pick", &dir), None);
        assert_eq!(
            prompt.pick_file("pick", &dir, INSTALLER_IMAGE_FILTERS),
            None
        );
    }

    #[test]
    fn terminal_file_prompt_enforces_filter() {
        let (_guard, dir) = temp_dir();
        std::fs::write(dir.join("notes.txt"), b"").unwrap();
        std::fs::write(dir.join("disk.img"), b"").unwrap();

        // With the *.iso filter nothing in the directory is acceptable, so
        // the prompt only ends when the answer is empty.
        let input = "2\nnotes.txt\nmissing.iso\ndisk.img\n\n";
        let prompt = TerminalPrompt::new(Cursor::new(input), Vec::new());
        assert_eq!(
            prompt.pick_file("pick", &dir, INSTALLER_IMAGE_FILTERS),
            None
        );

        let input = "\nnotes.txt\ndisk.img\n";
        let prompt = TerminalPrompt::new(Cursor::new(input), Vec::new());
        assert_eq!(
            prompt.pick_file("pick", &dir, INSTALLER_IMAGE_FILTERS),
            Some(dir.join("disk.img"))
        );
    }
}
