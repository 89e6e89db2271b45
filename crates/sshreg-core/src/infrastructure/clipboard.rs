//! Clipboard access through platform tools

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

/// Somewhere to put text for the user to paste
pub trait Clipboard {
    /// Returns `false` when the text could not be placed on the clipboard
    fn copy(&self, text: &str) -> bool;
}

/// Pipes text into the first clipboard tool that accepts it
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    commands: Vec<(String, Vec<String>)>,
}

impl Default for SystemClipboard {
    fn default() -> Self {
        let commands: &[(&str, &[&str])] = &[
            ("pbcopy", &[]),
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
            ("clip", &[]),
        ];
        Self {
            commands: commands
                .iter()
                .map(|(program, args)| {
                    (
                        program.to_string(),
                        args.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific list of `(program, args)` candidates
    pub fn with_commands(commands: Vec<(String, Vec<String>)>) -> Self {
        Self { commands }
    }

    fn try_command(program: &str, args: &[String], text: &str) -> std::io::Result<bool> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }
        Ok(child.wait()?.success())
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> bool {
        self.commands.iter().any(|(program, args)| {
            match Self::try_command(program, args, text) {
                Ok(true) => {
                    debug!(tool = %program, "Copied to clipboard");
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    debug!(tool = %program, error = %e, "Clipboard tool unavailable");
                    false
                }
            }
        })
    }
}
