//! Synchronous child-process invocation for external image tools.
//!
//! Handlers that shell out (mkfs.ubifs, mkfs.jffs2) go through [`Cmd`]: the
//! orchestrator blocks until the tool exits and a non-zero status becomes an
//! error carrying the tool's trimmed output.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

pub struct Cmd {
    program: String,
    command: Command,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Cmd {
            program: program.to_string(),
            command: Command::new(program),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.command.arg(path);
        self
    }

    /// Message prepended to the failure report when the tool exits non-zero.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Run the tool and wait for it, treating non-zero exit as an error.
    pub fn run(mut self) -> Result<()> {
        let output = self
            .command
            .output()
            .with_context(|| format!("running '{}'", self.program))?;
        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let prefix = self
            .error_msg
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        bail!(
            "{} (status {}): {}\n{}",
            prefix,
            output.status,
            stdout.trim(),
            stderr.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command() {
        Cmd::new("true").run().unwrap();
    }

    #[test]
    fn failing_command_reports_message_and_output() {
        let err = Cmd::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .error_msg("tool failed")
            .run()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("tool failed"));
        assert!(message.contains("broken"));
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(Cmd::new("definitely_not_a_real_command_12345").run().is_err());
    }
}
