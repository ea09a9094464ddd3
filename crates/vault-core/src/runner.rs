//! Subprocess invocation for the OpenSSH client tools.
//!
//! Everything that touches real key material or a remote host goes through
//! [`CommandRunner`], so key and host operations can be exercised without
//! `ssh-keygen`, `ssh` or `ssh-copy-id` installed.

use crate::error::{Result, VaultError};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stderr, falling back to the exit status when stderr is empty.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.status {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput>;
}

/// Runs real binaries resolved from PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        let bin =
            which::which(program).map_err(|_| VaultError::ToolNotInstalled(program.to_string()))?;
        debug!(program, ?args, "running");

        let mut cmd = Command::new(&bin);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let failed = |e: std::io::Error| VaultError::ToolFailed {
            tool: program.to_string(),
            reason: e.to_string(),
        };
        let mut child = cmd.spawn().map_err(failed)?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).map_err(failed)?;
        }
        let output = child.wait_with_output().map_err(failed)?;

        let out = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program, status = ?out.status, "finished");
        Ok(out)
    }
}

/// Collect arguments into the owned form [`CommandRunner::run`] takes.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
