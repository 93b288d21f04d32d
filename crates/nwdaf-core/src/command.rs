//! External process execution behind a trait, so `tc` and `ip` calls can be
//! replaced by a recorder in tests.

use std::io;
use std::process::{Command, ExitStatus};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    NonZero {
        command: String,
        status: String,
        stderr: String,
    },
}

impl CommandError {
    /// Stderr of a command that ran and failed, if that is what happened.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::NonZero { stderr, .. } => Some(stderr),
            CommandError::Spawn { .. } => None,
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a program with arguments and reports success or failure.
pub trait CommandRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<Output, CommandError>;
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
        tracing::debug!(program, ?args, "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            tracing::debug!(program, ?args, status = %output.status, %stderr, "command returned non-zero status");
            return Err(CommandError::NonZero {
                command: command_line(program, args),
                status: describe_status(output.status),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(Output { stdout, stderr })
    }
}

/// Renders a program and its arguments as a single shell-like line.
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}
